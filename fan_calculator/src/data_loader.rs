use crate::error::OfferResult;
use crate::location_mapper::LocationMapper;
use crate::models::WideTable;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, info};
use std::io::Read;
use std::path::Path;

const GRID_COLUMNS: [&str; 3] = ["Grid_Point", "Grid_Injection_Point", "Grid_Exit_Point"];
pub const BUS_COLUMN: &str = "Bus_Id";
pub const PERIOD_ID_COLUMN: &str = "Trading_Period_Id";

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%b-%Y"];

/// Minutes in one trading period.
pub const PERIOD_MINUTES: i64 = 30;

pub struct DataLoader {
    delimiter: u8,
    locations: Option<LocationMapper>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self::with_delimiter(b',')
    }

    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter,
            locations: None,
        }
    }

    /// Merge nodal metadata into every loaded table.
    pub fn with_locations(mut self, locations: LocationMapper) -> Self {
        self.locations = Some(locations);
        self
    }

    /// Load an offer CSV and apply the full normalisation chain.
    pub fn load_offers<P: AsRef<Path>>(&self, path: P) -> OfferResult<WideTable> {
        let path = path.as_ref();
        info!("Loading offers from {}", path.display());
        let file = std::fs::File::open(path)?;
        self.load_offers_from_reader(file)
    }

    pub fn load_offers_from_reader<R: Read>(&self, reader: R) -> OfferResult<WideTable> {
        let table = self.read_raw(reader)?;
        let table = normalise_columns(table);
        let table = strip_cells(table);
        let table = add_market_node(table);
        let table = match &self.locations {
            Some(locations) => locations.attach(table),
            None => table,
        };
        let table = add_period_id(table);
        debug!(
            "Loaded {} rows with {} columns",
            table.height(),
            table.columns.len()
        );
        Ok(table)
    }

    /// Read a CSV verbatim, without any column or cell normalisation.
    pub fn read_raw<R: Read>(&self, reader: R) -> OfferResult<WideTable> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns = csv_reader
            .headers()?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        Ok(WideTable::new(columns, rows))
    }
}

/// Title-case a header the way the market data is usually labelled:
/// the first cased letter of each word upper, the rest lower.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_cased = false;
    for ch in name.trim().chars() {
        if ch.is_alphabetic() {
            if previous_cased {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(ch);
            previous_cased = false;
        }
    }
    out
}

/// Strip and title-case headers, and give every grid point column one name.
pub fn normalise_columns(mut table: WideTable) -> WideTable {
    table.columns = table
        .columns
        .iter()
        .map(|c| {
            let titled = title_case(c);
            if GRID_COLUMNS.contains(&titled.as_str()) {
                BUS_COLUMN.to_string()
            } else {
                titled
            }
        })
        .collect();
    table
}

pub fn strip_cells(mut table: WideTable) -> WideTable {
    for row in &mut table.rows {
        for value in row.iter_mut() {
            let trimmed = value.trim();
            if trimmed.len() != value.len() {
                *value = trimmed.to_string();
            }
        }
    }
    table
}

/// Add the `Node` column. Generation offers identify a node as
/// `"<bus> <station><unit>"`; interruptible load has no unit, so the bus
/// itself is the node and blank `Station`/`Unit` columns are added.
pub fn add_market_node(mut table: WideTable) -> WideTable {
    let Some(bus) = table.column_index(BUS_COLUMN) else {
        return table;
    };

    let station = table.column_index("Station");
    let unit = table.column_index("Unit");

    let nodes: Vec<String> = table
        .rows
        .iter()
        .map(|row| match (station, unit) {
            (Some(s), Some(u)) => format!("{} {}{}", value(row, bus), value(row, s), value(row, u)),
            _ => value(row, bus).to_string(),
        })
        .collect();

    set_column(&mut table, "Node", nodes);
    if station.is_none() {
        let blanks = vec![String::new(); table.height()];
        set_column(&mut table, "Station", blanks);
    }
    if unit.is_none() {
        let blanks = vec![String::new(); table.height()];
        set_column(&mut table, "Unit", blanks);
    }
    table
}

/// Add `Trading_Period_Id` (`yyyymmddpp`) where date and period parse.
pub fn add_period_id(mut table: WideTable) -> WideTable {
    let (Some(date), Some(period)) = (
        table.column_index("Trading_Date"),
        table.column_index("Trading_Period"),
    ) else {
        return table;
    };

    let ids: Vec<String> = table
        .rows
        .iter()
        .map(|row| {
            match (
                parse_trading_date(value(row, date)),
                value(row, period).trim().parse::<u32>(),
            ) {
                (Some(d), Ok(p)) => format!("{}{:02}", d.format("%Y%m%d"), p),
                _ => String::new(),
            }
        })
        .collect();

    set_column(&mut table, PERIOD_ID_COLUMN, ids);
    table
}

fn value(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn set_column(table: &mut WideTable, name: &str, values: Vec<String>) {
    match table.column_index(name) {
        Some(idx) => {
            for (row, value) in table.rows.iter_mut().zip(values) {
                row[idx] = value;
            }
        }
        None => {
            table.columns.push(name.to_string());
            for (row, value) in table.rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
    }
}

pub fn parse_trading_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Timestamp for a trading period: the midpoint of the half hour.
pub fn trading_period_timestamp(date: NaiveDate, period: u32) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
        + Duration::minutes(period as i64 * PERIOD_MINUTES - PERIOD_MINUTES / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "\
 GRID_INJECTION_POINT , STATION ,UNIT,TRADING_DATE,TRADING_PERIOD,BAND1_PLSR_6S_MAX,BAND1_POWER
HLY2201 , HLY ,5,2014-01-01,3, 10 ,120
";

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("BAND1_PLSR_6S_MAX"), "Band1_Plsr_6S_Max");
        assert_eq!(title_case(" trading_date "), "Trading_Date");
        assert_eq!(title_case("band10_60s_percent"), "Band10_60S_Percent");
    }

    #[test]
    fn test_load_normalises_table() {
        let table = DataLoader::new().load_offers_from_reader(RAW.as_bytes()).unwrap();

        assert!(table.has_column("Bus_Id"));
        assert!(table.has_column("Band1_Plsr_6S_Max"));

        let node = table.column_index("Node").unwrap();
        assert_eq!(table.rows[0][node], "HLY2201 HLY5");

        let id = table.column_index(PERIOD_ID_COLUMN).unwrap();
        assert_eq!(table.rows[0][id], "2014010103");

        let band = table.column_index("Band1_Plsr_6S_Max").unwrap();
        assert_eq!(table.rows[0][band], "10");
    }

    #[test]
    fn test_interruptible_load_node_is_bus() {
        let raw = "Grid_Exit_Point,Trading_Date,Trading_Period,Band1_6S_Max,Band1_6S_Price\nHAY2201,2014-01-01,1,5,20\n";
        let table = DataLoader::new().load_offers_from_reader(raw.as_bytes()).unwrap();

        let node = table.column_index("Node").unwrap();
        assert_eq!(table.rows[0][node], "HAY2201");
        let unit = table.column_index("Unit").unwrap();
        assert_eq!(table.rows[0][unit], "");
    }

    #[test]
    fn test_locations_are_merged_on_node() {
        let mut locations = LocationMapper::new(["Region", "Island"]);
        locations.add_location("HLY2201 HLY5", None, vec!["Waikato".into(), "North".into()]);

        let table = DataLoader::new()
            .with_locations(locations)
            .load_offers_from_reader(RAW.as_bytes())
            .unwrap();

        let region = table.column_index("Region").unwrap();
        assert_eq!(table.rows[0][region], "Waikato");
        assert!(table.has_column("Island"));
        assert!(table.has_column(PERIOD_ID_COLUMN));
    }

    #[test]
    fn test_trading_period_timestamp() {
        let date = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap();
        let ts = trading_period_timestamp(date, 1);
        assert_eq!(ts.format("%H:%M").to_string(), "00:15");
        let ts = trading_period_timestamp(date, 48);
        assert_eq!(ts.format("%H:%M").to_string(), "23:45");
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2014, 3, 9);
        assert_eq!(parse_trading_date("2014-03-09"), expected);
        assert_eq!(parse_trading_date("09/03/2014"), expected);
        assert_eq!(parse_trading_date("09-Mar-2014"), expected);
        assert_eq!(parse_trading_date("not a date"), None);
    }
}
