use crate::allocator::AllocationMatrix;
use crate::error::OfferResult;
use crate::fan_curve::ThresholdRow;
use crate::models::{FanRow, OfferRecord};
use chrono::NaiveDateTime;
use log::info;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

fn datetime_series(name: &str, values: impl Iterator<Item = NaiveDateTime>) -> PolarsResult<Series> {
    let millis: Vec<i64> = values.map(|ts| ts.and_utc().timestamp_millis()).collect();
    Series::new(name.into(), millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
}

/// Long offer table: Node, Station, Unit, Timestamp, Product_Type,
/// Reserve_Type, Band, Price, Quantity, Percent.
pub fn offers_to_dataframe(records: &[OfferRecord]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("Node".into(), records.iter().map(|r| r.node.as_str()).collect::<Vec<_>>()),
        Series::new("Station".into(), records.iter().map(|r| r.station.as_str()).collect::<Vec<_>>()),
        Series::new("Unit".into(), records.iter().map(|r| r.unit.as_str()).collect::<Vec<_>>()),
        datetime_series("Timestamp", records.iter().map(|r| r.timestamp))?,
        Series::new(
            "Product_Type".into(),
            records.iter().map(|r| r.product_type.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "Reserve_Type".into(),
            records.iter().map(|r| r.reserve_type.as_str()).collect::<Vec<_>>(),
        ),
        Series::new("Band".into(), records.iter().map(|r| r.band as i64).collect::<Vec<_>>()),
        Series::new("Price".into(), records.iter().map(|r| r.price).collect::<Vec<_>>()),
        Series::new("Quantity".into(), records.iter().map(|r| r.quantity).collect::<Vec<_>>()),
        Series::new("Percent".into(), records.iter().map(|r| r.percent).collect::<Vec<_>>()),
    ])
}

pub fn allocation_to_dataframe(matrix: &AllocationMatrix) -> PolarsResult<DataFrame> {
    let cells = matrix.cells();
    let node = matrix.group.as_ref().map(|g| g.node.as_str()).unwrap_or("");
    DataFrame::new(vec![
        Series::new("Node".into(), vec![node; cells.len()]),
        Series::new(
            "Capacity_Increment".into(),
            cells.iter().map(|c| c.capacity_increment as i64).collect::<Vec<_>>(),
        ),
        Series::new("Price".into(), cells.iter().map(|c| c.price).collect::<Vec<_>>()),
        Series::new(
            "Reserve_Quantity".into(),
            cells.iter().map(|c| c.marginal_reserve_quantity).collect::<Vec<_>>(),
        ),
    ])
}

/// Fan table: Node, Timestamp, Cumulative_Quantity, Price, Reserve_Price,
/// Reserve_Quantity, Incr_Quantity.
pub fn fan_to_dataframe(rows: &[FanRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("Node".into(), rows.iter().map(|r| r.node.as_str()).collect::<Vec<_>>()),
        datetime_series("Timestamp", rows.iter().map(|r| r.timestamp))?,
        Series::new(
            "Cumulative_Quantity".into(),
            rows.iter().map(|r| r.cumulative_quantity as i64).collect::<Vec<_>>(),
        ),
        Series::new("Price".into(), rows.iter().map(|r| r.price).collect::<Vec<_>>()),
        Series::new("Reserve_Price".into(), rows.iter().map(|r| r.reserve_price).collect::<Vec<_>>()),
        Series::new(
            "Reserve_Quantity".into(),
            rows.iter().map(|r| r.reserve_quantity).collect::<Vec<_>>(),
        ),
        Series::new(
            "Incr_Quantity".into(),
            rows.iter().map(|r| r.increment_quantity).collect::<Vec<_>>(),
        ),
    ])
}

pub fn threshold_to_dataframe(rows: &[ThresholdRow]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Series::new("Node".into(), rows.iter().map(|r| r.node.as_str()).collect::<Vec<_>>()),
        datetime_series("Timestamp", rows.iter().map(|r| r.timestamp))?,
        Series::new(
            "Cumulative_Quantity".into(),
            rows.iter().map(|r| r.cumulative_quantity as i64).collect::<Vec<_>>(),
        ),
        Series::new("Price".into(), rows.iter().map(|r| r.price).collect::<Vec<_>>()),
        Series::new(
            "Incr_Quantity".into(),
            rows.iter().map(|r| r.increment_quantity).collect::<Vec<_>>(),
        ),
        Series::new(
            "Reserve_Quantity".into(),
            rows.iter().map(|r| r.reserve_quantity).collect::<Vec<_>>(),
        ),
        Series::new(
            "Cumulative_Reserve".into(),
            rows.iter().map(|r| r.cumulative_reserve).collect::<Vec<_>>(),
        ),
        Series::new(
            "Price_Threshold".into(),
            rows.iter().map(|r| r.price_threshold).collect::<Vec<_>>(),
        ),
    ])
}

/// Write a frame as Parquet when the path ends in `.parquet`, CSV otherwise.
pub fn write_frame<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> OfferResult<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => {
            ParquetWriter::new(file).finish(df)?;
        }
        _ => {
            CsvWriter::new(file).include_header(true).finish(df)?;
        }
    }
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate;
    use crate::offer_stack::tests::{offer, reserve};

    #[test]
    fn test_offer_frame_shape() {
        let records = vec![offer("A", 1, 10.0, 5.0), reserve("A", 1, 2.0, 5.0, 50.0)];
        let df = offers_to_dataframe(&records).unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 10);
        let percent = df.column("Percent").unwrap().f64().unwrap();
        assert_eq!(percent.get(0), None);
        assert_eq!(percent.get(1), Some(50.0));
    }

    #[test]
    fn test_allocation_frame() {
        let matrix = allocate(3, &[reserve("A", 1, 10.0, 2.0, 100.0)]).unwrap();
        let df = allocation_to_dataframe(&matrix).unwrap();
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn test_write_csv_and_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = offers_to_dataframe(&[offer("A", 1, 10.0, 5.0)]).unwrap();

        let csv_path = dir.path().join("offers.csv");
        write_frame(&mut df, &csv_path).unwrap();
        let written = std::fs::read_to_string(&csv_path).unwrap();
        assert!(written.starts_with("Node,Station,Unit,Timestamp"));

        let parquet_path = dir.path().join("offers.parquet");
        write_frame(&mut df, &parquet_path).unwrap();
        assert!(parquet_path.metadata().unwrap().len() > 0);
    }
}
