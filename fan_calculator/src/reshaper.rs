use crate::band_classifier;
use crate::data_loader::{parse_trading_date, trading_period_timestamp};
use crate::error::{OfferError, OfferResult};
use crate::models::{BandColumnKey, OfferRecord, Parameter, WideTable};
use chrono::NaiveDateTime;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NODE_COLUMN: &str = "Node";
pub const STATION_COLUMN: &str = "Station";
pub const UNIT_COLUMN: &str = "Unit";
pub const TRADING_DATE_COLUMN: &str = "Trading_Date";
pub const TRADING_PERIOD_COLUMN: &str = "Trading_Period";

/// Non-band columns every source table must carry.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    NODE_COLUMN,
    STATION_COLUMN,
    UNIT_COLUMN,
    TRADING_DATE_COLUMN,
    TRADING_PERIOD_COLUMN,
];

/// Column positions of one band family inside the wide table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandColumns {
    pub price: usize,
    pub quantity: usize,
    pub percent: Option<usize>,
}

#[derive(Debug, Default)]
struct PartialBand {
    price: Option<usize>,
    quantity: Option<usize>,
    percent: Option<usize>,
}

/// Per source row values shared by every band emitted from it.
struct RowContext {
    node: String,
    station: String,
    unit: String,
    timestamp: NaiveDateTime,
    general: Arc<BTreeMap<String, String>>,
}

/// Pivots a wide offer table into long offer records, one per (row, band).
pub struct RecordReshaper<'a> {
    table: &'a WideTable,
    bands: BTreeMap<BandColumnKey, BandColumns>,
    general: Vec<usize>,
}

impl<'a> RecordReshaper<'a> {
    /// Classify every band column and validate the schema up front.
    pub fn new(table: &'a WideTable) -> OfferResult<Self> {
        for required in REQUIRED_COLUMNS {
            if !table.has_column(required) {
                return Err(OfferError::MissingGeneralColumn {
                    column: required.to_string(),
                });
            }
        }

        let mut partial: BTreeMap<BandColumnKey, PartialBand> = BTreeMap::new();
        let mut general = Vec::new();

        for (idx, column) in table.columns.iter().enumerate() {
            if !column.contains("Band") {
                general.push(idx);
                continue;
            }

            let classified = band_classifier::classify(column)?;
            let entry = partial.entry(classified.key).or_default();
            let slot = match classified.parameter {
                Parameter::Price => &mut entry.price,
                Parameter::Quantity => &mut entry.quantity,
                Parameter::Percent => &mut entry.percent,
                Parameter::Other(token) => {
                    warn!("Ignoring band column {} (unknown parameter {})", column, token);
                    continue;
                }
            };
            if slot.is_some() {
                warn!("Duplicate band column {} for {}, keeping the first", column, classified.key);
            } else {
                *slot = Some(idx);
            }
        }

        let mut bands = BTreeMap::new();
        for (key, band) in partial {
            let price = band.price.ok_or(OfferError::IncompleteBand {
                key,
                parameter: Parameter::Price,
            })?;
            let quantity = band.quantity.ok_or(OfferError::IncompleteBand {
                key,
                parameter: Parameter::Quantity,
            })?;
            bands.insert(
                key,
                BandColumns {
                    price,
                    quantity,
                    percent: band.percent,
                },
            );
        }

        debug!(
            "Classified {} band families and {} general columns",
            bands.len(),
            general.len()
        );

        Ok(Self {
            table,
            bands,
            general,
        })
    }

    pub fn band_keys(&self) -> impl Iterator<Item = &BandColumnKey> {
        self.bands.keys()
    }

    pub fn band_columns(&self, key: &BandColumnKey) -> Option<&BandColumns> {
        self.bands.get(key)
    }

    /// One record set per band family, in ascending key order.
    pub fn reshape_groups(&self) -> OfferResult<Vec<(BandColumnKey, Vec<OfferRecord>)>> {
        let contexts = self.row_contexts()?;
        let mut groups = Vec::with_capacity(self.bands.len());

        for (key, columns) in &self.bands {
            let mut records = Vec::with_capacity(contexts.len());
            for (row_idx, (row, ctx)) in self.table.rows.iter().zip(&contexts).enumerate() {
                let price = self.numeric(row, columns.price, row_idx)?;
                let quantity = self.numeric(row, columns.quantity, row_idx)?;
                let percent = match columns.percent {
                    Some(idx) => Some(self.numeric(row, idx, row_idx)?),
                    None => None,
                };

                records.push(OfferRecord {
                    node: ctx.node.clone(),
                    station: ctx.station.clone(),
                    unit: ctx.unit.clone(),
                    timestamp: ctx.timestamp,
                    product_type: key.product_type,
                    reserve_type: key.reserve_type,
                    band: key.band,
                    price,
                    quantity,
                    percent,
                    general: Arc::clone(&ctx.general),
                });
            }
            groups.push((*key, records));
        }

        Ok(groups)
    }

    pub fn reshape(&self) -> OfferResult<Vec<OfferRecord>> {
        Ok(self
            .reshape_groups()?
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect())
    }

    fn row_contexts(&self) -> OfferResult<Vec<RowContext>> {
        let idx = |name: &str| self.table.column_index(name).unwrap_or_default();
        let (node, station, unit) = (idx(NODE_COLUMN), idx(STATION_COLUMN), idx(UNIT_COLUMN));
        let (date, period) = (idx(TRADING_DATE_COLUMN), idx(TRADING_PERIOD_COLUMN));

        self.table
            .rows
            .iter()
            .enumerate()
            .map(|(row_idx, row)| {
                let trading_date = parse_trading_date(cell(row, date)).ok_or_else(|| {
                    self.invalid(row_idx, date, cell(row, date))
                })?;
                let trading_period = cell(row, period)
                    .parse::<u32>()
                    .map_err(|_| self.invalid(row_idx, period, cell(row, period)))?;

                let general = self
                    .general
                    .iter()
                    .map(|&i| (self.table.columns[i].clone(), cell(row, i).to_string()))
                    .collect();

                Ok(RowContext {
                    node: cell(row, node).to_string(),
                    station: cell(row, station).to_string(),
                    unit: cell(row, unit).to_string(),
                    timestamp: trading_period_timestamp(trading_date, trading_period),
                    general: Arc::new(general),
                })
            })
            .collect()
    }

    fn numeric(&self, row: &[String], idx: usize, row_idx: usize) -> OfferResult<f64> {
        let raw = cell(row, idx);
        if raw.is_empty() {
            return Ok(0.0);
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(self.invalid(row_idx, idx, raw)),
        }
    }

    fn invalid(&self, row: usize, idx: usize, value: &str) -> OfferError {
        OfferError::InvalidValue {
            column: self.table.columns[idx].clone(),
            row,
            value: value.to_string(),
        }
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|s| s.trim()).unwrap_or("")
}

/// Reshape a whole wide table into long offer records.
pub fn reshape(table: &WideTable) -> OfferResult<Vec<OfferRecord>> {
    RecordReshaper::new(table)?.reshape()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductType, ReserveType};

    fn sample_table() -> WideTable {
        let columns = [
            "Node",
            "Station",
            "Unit",
            "Trading_Date",
            "Trading_Period",
            "Company",
            "Band1_Price",
            "Band1_Power",
            "Band2_Price",
            "Band2_Power",
            "Band1_Plsr_6S_Price",
            "Band1_Plsr_6S_Max",
            "Band1_Plsr_6S_Percent",
        ];
        let rows = vec![
            vec!["HLY2201 HLY5", "HLY", "5", "2014-01-01", "1", "GENE", "0.01", "120", "55", "43.7", "1.5", "30", "20"],
            vec!["HLY2201 HLY5", "HLY", "5", "2014-01-01", "2", "GENE", "0.02", "110", "60", "", "2.0", "25", "15"],
        ];
        WideTable::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        )
    }

    #[test]
    fn test_reshape_row_counts() {
        let table = sample_table();
        let reshaper = RecordReshaper::new(&table).unwrap();
        let groups = reshaper.reshape_groups().unwrap();

        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|(_, records)| records.len() == table.height()));

        let total: usize = groups.iter().map(|(_, r)| r.len()).sum();
        assert_eq!(total, 3 * table.height());
    }

    #[test]
    fn test_groups_in_key_order_and_rows_in_source_order() {
        let table = sample_table();
        let groups = RecordReshaper::new(&table).unwrap().reshape_groups().unwrap();
        let keys: Vec<_> = groups.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let (key, energy) = &groups[0];
        assert_eq!(key.product_type, ProductType::Energy);
        assert_eq!(key.band, 1);
        assert_eq!(energy[0].price, 0.01);
        assert_eq!(energy[1].price, 0.02);
        assert!(energy[0].timestamp < energy[1].timestamp);
    }

    #[test]
    fn test_general_columns_carried_and_values_canonicalised() {
        let table = sample_table();
        let records = reshape(&table).unwrap();

        let reserve: Vec<_> = records
            .iter()
            .filter(|r| r.reserve_type == ReserveType::Fir)
            .collect();
        assert_eq!(reserve.len(), 2);
        assert_eq!(reserve[0].quantity, 30.0);
        assert_eq!(reserve[0].percent, Some(20.0));
        assert_eq!(reserve[0].general_value("Company"), Some("GENE"));
        assert!(reserve[0].general_value("Band1_Price").is_none());

        let blank = records
            .iter()
            .find(|r| r.is_energy() && r.band == 2 && r.price == 60.0)
            .unwrap();
        assert_eq!(blank.quantity, 0.0);
        assert_eq!(blank.percent, None);
    }

    #[test]
    fn test_missing_general_column() {
        let mut table = sample_table();
        let idx = table.column_index("Station").unwrap();
        table.columns.remove(idx);
        for row in &mut table.rows {
            row.remove(idx);
        }
        let err = RecordReshaper::new(&table).err().unwrap();
        assert!(matches!(err, OfferError::MissingGeneralColumn { column } if column == "Station"));
    }

    #[test]
    fn test_incomplete_band() {
        let mut table = sample_table();
        let idx = table.column_index("Band2_Price").unwrap();
        table.columns[idx] = "Band2_Note".to_string();
        let err = RecordReshaper::new(&table).err().unwrap();
        assert!(matches!(
            err,
            OfferError::IncompleteBand { parameter: Parameter::Price, .. }
        ));
    }

    #[test]
    fn test_invalid_numeric_cell() {
        let mut table = sample_table();
        table.rows[1][6] = "abc".to_string();
        let err = reshape(&table).unwrap_err();
        assert!(matches!(err, OfferError::InvalidValue { row: 1, .. }));
    }

    #[test]
    fn test_non_finite_numeric_cell() {
        for raw in ["inf", "-inf", "NaN"] {
            let mut table = sample_table();
            table.rows[0][6] = raw.to_string();
            let err = reshape(&table).unwrap_err();
            assert!(
                matches!(err, OfferError::InvalidValue { row: 0, ref value, .. } if value == raw),
                "{}",
                raw
            );
        }
    }
}
