use fan_calculator::{
    aggregate_threshold, CapacityMapper, DataLoader, FanConfig, FanCurveBuilder, RecordReshaper,
};

const OFFERS: &str = "\
Grid_Injection_Point,Station,Unit,Trading_Date,Trading_Period,Band1_Price,Band1_Power,Band2_Price,Band2_Power,Band1_Plsr_6S_Price,Band1_Plsr_6S_Max,Band1_Plsr_6S_Percent,Band2_Plsr_6S_Price,Band2_Plsr_6S_Max,Band2_Plsr_6S_Percent
HLY2201,HLY,5,2014-01-15,35,0.01,6,85.5,3.5,1.5,2,50,12,3,25
";

fn main() -> anyhow::Result<()> {
    // One 10 MW unit offering energy in two bands and FIR in two PLSR bands
    let table = DataLoader::new().load_offers_from_reader(OFFERS.as_bytes())?;
    let records = RecordReshaper::new(&table)?.reshape()?;

    let mut capacities = CapacityMapper::new();
    capacities.add_capacity("HLY2201 HLY5", 10);

    let fan = FanCurveBuilder::new(FanConfig::fir_plsr())
        .with_capacities(&capacities)
        .build(&records)?;

    println!("Fan Curve");
    println!("=========");
    for row in &fan {
        println!(
            "  {:>3} MW @ ${:>6.2}  reserve ${:>5.2}: {:+.2} MW",
            row.cumulative_quantity, row.price, row.reserve_price, row.reserve_quantity
        );
    }

    println!();
    println!("Reserve at or below $5/MWh:");
    for row in aggregate_threshold(&fan, 5.0) {
        println!(
            "  {:>3} MW energy -> {:.2} MW reserve",
            row.cumulative_quantity, row.cumulative_reserve
        );
    }

    Ok(())
}
