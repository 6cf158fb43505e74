use anyhow::Result;
use clap::{Parser, ValueEnum};
use fan_calculator::{
    aggregate_threshold, frames, CapacityMapper, DataLoader, FanConfig, FanCurveBuilder,
    FanRow, LocationMapper, OfferFilter, ProductType, RecordReshaper, ReserveType,
};
use log::info;
use std::collections::BTreeMap;

#[derive(Parser)]
#[command(name = "fan_calculator")]
#[command(about = "Reshape energy/reserve offers and build joint energy-reserve fan curves")]
struct Args {
    /// Offer CSV in wide (band column) format
    #[arg(short, long)]
    input: String,

    /// CSV with Node and Capacity columns (unit maximum output, MW)
    #[arg(short, long)]
    capacities: Option<String>,

    /// Reserve product to pair with energy
    #[arg(short, long, value_enum, default_value = "fir-plsr")]
    reserve: ReserveProduct,

    /// CSV of nodal metadata (Node, optional Bus Id, region columns...)
    #[arg(short, long)]
    locations: Option<String>,

    /// Restrict to one market node
    #[arg(short, long)]
    node: Option<String>,

    /// Keep offers whose source column matches, as COLUMN=VALUE (repeatable)
    #[arg(long = "where", value_parser = parse_condition)]
    conditions: Vec<(String, String)>,

    /// Reserve price cap ($/MWh) for threshold curves
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Capacity (MW) to use for nodes missing from the capacity file
    #[arg(long)]
    default_capacity: Option<u32>,

    /// Also write the long offer table here (.csv or .parquet)
    #[arg(long)]
    long_output: Option<String>,

    /// Write the fan table here (.csv or .parquet) instead of stdout
    #[arg(long)]
    fan_output: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum ReserveProduct {
    FirPlsr,
    SirPlsr,
    FirTwdsr,
    SirTwdsr,
    FirIl,
    SirIl,
}

impl ReserveProduct {
    fn config(&self) -> FanConfig {
        match self {
            ReserveProduct::FirPlsr => FanConfig::fir_plsr(),
            ReserveProduct::SirPlsr => FanConfig::sir_plsr(),
            ReserveProduct::FirTwdsr => FanConfig::fir_twdsr(),
            ReserveProduct::SirTwdsr => FanConfig::sir_twdsr(),
            ReserveProduct::FirIl => FanConfig::new(ReserveType::Fir, ProductType::Il),
            ReserveProduct::SirIl => FanConfig::new(ReserveType::Sir, ProductType::Il),
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Summary,
}

fn parse_condition(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected COLUMN=VALUE, got {:?}", raw)),
    }
}

/// CSV rendering of the fan table, collapsed by [`aggregate_threshold`]
/// when a reserve price cap is set.
fn fan_csv(fan: &[FanRow], threshold: Option<f64>) -> String {
    let mut out = String::new();
    match threshold {
        Some(threshold) => {
            out.push_str("Node,Timestamp,CumulativeQuantity,Price,IncrQuantity,ReserveQuantity,CumulativeReserve,PriceThreshold\n");
            for row in aggregate_threshold(fan, threshold) {
                out.push_str(&format!(
                    "{},{},{},{:.2},{:.4},{:.4},{:.4},{:.2}\n",
                    row.node,
                    row.timestamp,
                    row.cumulative_quantity,
                    row.price,
                    row.increment_quantity,
                    row.reserve_quantity,
                    row.cumulative_reserve,
                    row.price_threshold
                ));
            }
        }
        None => {
            out.push_str("Node,Timestamp,CumulativeQuantity,Price,ReservePrice,ReserveQuantity,IncrQuantity\n");
            for row in fan {
                out.push_str(&format!(
                    "{},{},{},{:.2},{:.2},{:.4},{:.4}\n",
                    row.node,
                    row.timestamp,
                    row.cumulative_quantity,
                    row.price,
                    row.reserve_price,
                    row.reserve_quantity,
                    row.increment_quantity
                ));
            }
        }
    }
    out
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting fan curve calculation");

    let mut config = args.reserve.config();
    if let Some(threshold) = args.threshold {
        config = config.with_threshold(threshold);
    }
    if let Some(capacity) = args.default_capacity {
        config = config.with_default_capacity(capacity);
    }

    let mut loader = DataLoader::new();
    if let Some(path) = &args.locations {
        loader = loader.with_locations(LocationMapper::from_csv(path)?);
    }
    let table = loader.load_offers(&args.input)?;
    let records = RecordReshaper::new(&table)?.reshape()?;
    info!("Reshaped {} source rows into {} offers", table.height(), records.len());

    let mut filter = OfferFilter::new();
    if let Some(node) = &args.node {
        filter = filter.node(node.clone());
    }
    for (column, value) in &args.conditions {
        filter = filter.general_eq(column.clone(), value.clone());
    }
    let records = filter.apply(&records);
    if records.is_empty() {
        anyhow::bail!("No offers match the requested node and conditions");
    }

    if let Some(path) = &args.long_output {
        let mut df = frames::offers_to_dataframe(&records)?;
        frames::write_frame(&mut df, path)?;
    }

    let capacities = match &args.capacities {
        Some(path) => CapacityMapper::from_csv(path)?,
        None => CapacityMapper::new(),
    };

    let builder = FanCurveBuilder::new(config.clone()).with_capacities(&capacities);
    let fan = builder.build(&records)?;
    info!("Built {} fan rows", fan.len());

    if let Some(path) = &args.fan_output {
        let mut df = frames::fan_to_dataframe(&fan)?;
        frames::write_frame(&mut df, path)?;
    }

    match args.output {
        OutputFormat::Json => match config.price_threshold {
            Some(threshold) => {
                let capped = aggregate_threshold(&fan, threshold);
                println!("{}", serde_json::to_string_pretty(&capped)?);
            }
            None => println!("{}", serde_json::to_string_pretty(&fan)?),
        },
        OutputFormat::Csv => print!("{}", fan_csv(&fan, config.price_threshold)),
        OutputFormat::Summary => {
            // Peak reserve per group, at or under the threshold when one is set
            let threshold = config.price_threshold.unwrap_or(f64::INFINITY);
            let mut peaks: BTreeMap<(String, String), (u32, f64)> = BTreeMap::new();
            for row in aggregate_threshold(&fan, threshold) {
                let key = (row.node.clone(), row.timestamp.to_string());
                let entry = peaks.entry(key).or_insert((0, 0.0));
                entry.0 = entry.0.max(row.cumulative_quantity);
                entry.1 = entry.1.max(row.cumulative_reserve);
            }

            println!("Fan Curve Summary");
            println!("=================");
            println!(
                "Reserve product: {} {}",
                config.product_type, config.reserve_type
            );
            if let Some(threshold) = config.price_threshold {
                println!("Reserve price cap: ${:.2}/MWh", threshold);
            }
            println!();
            for ((node, timestamp), (energy_mw, reserve_mw)) in peaks {
                println!(
                    "  {} @ {}: {} MW energy, peak reserve {:.1} MW",
                    node, timestamp, energy_mw, reserve_mw
                );
            }
        }
    }

    Ok(())
}
