use crate::data_loader::BUS_COLUMN;
use crate::error::{OfferError, OfferResult};
use crate::models::WideTable;
use log::{info, warn};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

const NODE_COLUMN: &str = "Node";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LocationKey {
    node: String,
    bus: Option<String>,
}

/// Nodal metadata (region, island, coordinates...) keyed by market node,
/// and by `Bus_Id` as well when the reference file carries one.
#[derive(Debug, Clone, Default)]
pub struct LocationMapper {
    columns: Vec<String>,
    match_bus: bool,
    locations: HashMap<LocationKey, Vec<String>>,
}

impl LocationMapper {
    /// An empty mapper that will attach `columns`, keyed on node only.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            match_bus: false,
            locations: HashMap::new(),
        }
    }

    /// Load a metadata CSV. It needs a `Node` column; spaces in headers
    /// become underscores, and every other column is attached to offers.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> OfferResult<Self> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        let names: Vec<String> = df
            .get_columns()
            .iter()
            .map(|s| s.name().to_string().trim().replace(' ', "_"))
            .collect();
        let text = df
            .get_columns()
            .iter()
            .map(|s| s.cast(&DataType::String))
            .collect::<PolarsResult<Vec<_>>>()?;
        let text = text
            .iter()
            .map(|s| s.str())
            .collect::<PolarsResult<Vec<_>>>()?;

        let position = |name: &str| names.iter().position(|n| n == name);
        let node = position(NODE_COLUMN).ok_or_else(|| OfferError::MissingGeneralColumn {
            column: NODE_COLUMN.to_string(),
        })?;
        let bus = position(BUS_COLUMN);
        let attached: Vec<usize> = (0..names.len())
            .filter(|&i| i != node && Some(i) != bus)
            .collect();

        let mut mapper = Self::new(attached.iter().map(|&i| names[i].clone()));
        mapper.match_bus = bus.is_some();

        for row in 0..df.height() {
            let cell = |idx: usize| text[idx].get(row).unwrap_or("").trim().to_string();
            let values = attached.iter().map(|&i| cell(i)).collect();
            let bus_value = bus.map(|i| cell(i));
            mapper.add_location(&cell(node), bus_value.as_deref(), values);
        }

        info!(
            "Loaded {} locations with {} metadata columns from {}",
            mapper.len(),
            mapper.columns.len(),
            path.display()
        );
        Ok(mapper)
    }

    /// Register one location. `values` line up with [`columns`](Self::columns);
    /// `bus` is ignored unless the mapper matches on `Bus_Id`.
    pub fn add_location(&mut self, node: &str, bus: Option<&str>, mut values: Vec<String>) {
        values.resize(self.columns.len(), String::new());
        let key = LocationKey {
            node: node.to_string(),
            bus: if self.match_bus { bus.map(str::to_string) } else { None },
        };
        self.locations.insert(key, values);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Append the metadata columns to every row. Rows without a matching
    /// location keep blank metadata.
    pub fn attach(&self, mut table: WideTable) -> WideTable {
        let Some(node) = table.column_index(NODE_COLUMN) else {
            warn!("Offer table has no {} column, skipping location metadata", NODE_COLUMN);
            return table;
        };
        let bus = if self.match_bus {
            let bus = table.column_index(BUS_COLUMN);
            if bus.is_none() {
                warn!("Locations are keyed by {} but offers have none", BUS_COLUMN);
            }
            bus
        } else {
            None
        };

        // Existing columns win, and band-like names would be read as offer bands.
        let fresh: Vec<usize> = (0..self.columns.len())
            .filter(|&i| {
                let name = &self.columns[i];
                if table.has_column(name) || name.contains("Band") {
                    warn!("Skipping location column {}", name);
                    false
                } else {
                    true
                }
            })
            .collect();

        let mut unmatched = 0;
        for row in &mut table.rows {
            let key = LocationKey {
                node: cell(row, node),
                bus: if self.match_bus {
                    Some(bus.map(|i| cell(row, i)).unwrap_or_default())
                } else {
                    None
                },
            };

            match self.locations.get(&key) {
                Some(values) => row.extend(fresh.iter().map(|&i| values[i].clone())),
                None => {
                    unmatched += 1;
                    row.extend(fresh.iter().map(|_| String::new()));
                }
            }
        }

        if unmatched > 0 {
            warn!("{} offer rows have no location metadata", unmatched);
        }
        table
            .columns
            .extend(fresh.iter().map(|&i| self.columns[i].clone()));
        table
    }
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).map(|s| s.trim().to_string()).unwrap_or_default()
}
