use crate::models::{OfferRecord, ProductType, ReserveType};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Selects offer records by equality, exclusion and inclusive ranges.
///
/// Each equality list matches any of its values; separate criteria must
/// all hold. An empty list places no constraint.
#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    nodes: Vec<String>,
    stations: Vec<String>,
    product_types: Vec<ProductType>,
    reserve_types: Vec<ReserveType>,
    exclude_nodes: Vec<String>,
    exclude_stations: Vec<String>,
    // Source columns carried in `OfferRecord::general`, e.g. `Company`.
    general: BTreeMap<String, Vec<String>>,
    exclude_general: Vec<(String, String)>,
    price_range: Option<(f64, f64)>,
    time_range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl OfferFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.stations.push(station.into());
        self
    }

    pub fn product_type(mut self, product_type: ProductType) -> Self {
        self.product_types.push(product_type);
        self
    }

    pub fn reserve_type(mut self, reserve_type: ReserveType) -> Self {
        self.reserve_types.push(reserve_type);
        self
    }

    pub fn exclude_node(mut self, node: impl Into<String>) -> Self {
        self.exclude_nodes.push(node.into());
        self
    }

    pub fn exclude_station(mut self, station: impl Into<String>) -> Self {
        self.exclude_stations.push(station.into());
        self
    }

    /// Keep records whose source `column` equals `value`. Repeating a
    /// column allows any of its values.
    pub fn general_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.general
            .entry(column.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Drop records whose source `column` equals `value`.
    pub fn general_ne(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.exclude_general.push((column.into(), value.into()));
        self
    }

    pub fn price_between(mut self, low: f64, high: f64) -> Self {
        self.price_range = Some((low, high));
        self
    }

    pub fn time_between(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.time_range = Some((start, end));
        self
    }

    pub fn matches(&self, record: &OfferRecord) -> bool {
        fn any_of<T: PartialEq>(allowed: &[T], value: &T) -> bool {
            allowed.is_empty() || allowed.contains(value)
        }

        any_of(&self.nodes, &record.node)
            && any_of(&self.stations, &record.station)
            && any_of(&self.product_types, &record.product_type)
            && any_of(&self.reserve_types, &record.reserve_type)
            && !self.exclude_nodes.contains(&record.node)
            && !self.exclude_stations.contains(&record.station)
            && self.general.iter().all(|(column, allowed)| {
                record
                    .general_value(column)
                    .map_or(false, |v| allowed.iter().any(|a| a == v))
            })
            && !self
                .exclude_general
                .iter()
                .any(|(column, value)| record.general_value(column) == Some(value.as_str()))
            && self
                .price_range
                .map_or(true, |(lo, hi)| record.price >= lo && record.price <= hi)
            && self
                .time_range
                .map_or(true, |(lo, hi)| record.timestamp >= lo && record.timestamp <= hi)
    }

    /// Return the matching records; the input is left untouched.
    pub fn apply(&self, records: &[OfferRecord]) -> Vec<OfferRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}
