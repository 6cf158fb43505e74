use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Largest unit size, in MW, the fan builder will lay out increment by increment.
pub const MAX_UNIT_MW: u32 = 100_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProductType {
    Energy,
    #[serde(rename = "PLSR")]
    Plsr,
    #[serde(rename = "TWDSR")]
    Twdsr,
    #[serde(rename = "IL")]
    Il,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Energy => "Energy",
            ProductType::Plsr => "PLSR",
            ProductType::Twdsr => "TWDSR",
            ProductType::Il => "IL",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReserveType {
    Energy,
    #[serde(rename = "FIR")]
    Fir,
    #[serde(rename = "SIR")]
    Sir,
}

impl ReserveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReserveType::Energy => "Energy",
            ReserveType::Fir => "FIR",
            ReserveType::Sir => "SIR",
        }
    }
}

impl fmt::Display for ReserveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which value of a band a wide column carries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parameter {
    Price,
    /// `Power` (energy) and `Max` (reserve) columns both land here.
    Quantity,
    Percent,
    Other(String),
}

impl Parameter {
    pub fn from_token(token: &str) -> Self {
        match token {
            "Price" => Parameter::Price,
            "Power" | "Max" | "Quantity" => Parameter::Quantity,
            "Percent" => Parameter::Percent,
            other => Parameter::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Price => f.write_str("Price"),
            Parameter::Quantity => f.write_str("Quantity"),
            Parameter::Percent => f.write_str("Percent"),
            Parameter::Other(token) => f.write_str(token),
        }
    }
}

/// Identifies the family of wide columns that reshape into one offer group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BandColumnKey {
    pub product_type: ProductType,
    pub reserve_type: ReserveType,
    pub band: u32,
}

impl fmt::Display for BandColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/Band{}", self.product_type, self.reserve_type, self.band)
    }
}

/// Result of classifying one band column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandColumn {
    pub key: BandColumnKey,
    pub parameter: Parameter,
}

/// Partition key shared by stacking, allocation and fan building.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub timestamp: NaiveDateTime,
    pub node: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.node, self.timestamp)
    }
}

/// A wide-format offer table as handed over by the ingestion step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl WideTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn band_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str).filter(|c| c.contains("Band"))
    }

    pub fn general_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str).filter(|c| !c.contains("Band"))
    }
}

/// One band of one source row in long format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferRecord {
    pub node: String,
    pub station: String,
    pub unit: String,
    pub timestamp: NaiveDateTime,
    pub product_type: ProductType,
    pub reserve_type: ReserveType,
    pub band: u32,
    pub price: f64,
    pub quantity: f64,
    pub percent: Option<f64>,
    /// Every non-band column of the source row, shared by all bands of that row.
    #[serde(skip)]
    pub general: Arc<BTreeMap<String, String>>,
}

impl OfferRecord {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            timestamp: self.timestamp,
            node: self.node.clone(),
        }
    }

    pub fn band_key(&self) -> BandColumnKey {
        BandColumnKey {
            product_type: self.product_type,
            reserve_type: self.reserve_type,
            band: self.band,
        }
    }

    pub fn is_energy(&self) -> bool {
        self.product_type == ProductType::Energy
    }

    pub fn general_value(&self, column: &str) -> Option<&str> {
        self.general.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackedOffer {
    pub offer: OfferRecord,
    pub cumulative_quantity: f64,
}

/// One MW slice of an offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncrementRecord {
    pub offer: OfferRecord,
    pub increment_quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationCell {
    pub capacity_increment: u32,
    pub price: f64,
    pub marginal_reserve_quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanRow {
    pub timestamp: NaiveDateTime,
    pub node: String,
    pub cumulative_quantity: u32,
    pub price: f64,
    pub reserve_price: f64,
    pub reserve_quantity: f64,
    pub increment_quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    pub reserve_type: ReserveType,
    pub product_type: ProductType,
    pub price_threshold: Option<f64>,
    pub default_capacity_mw: Option<u32>,
}

impl FanConfig {
    pub fn new(reserve_type: ReserveType, product_type: ProductType) -> Self {
        Self {
            reserve_type,
            product_type,
            price_threshold: None,
            default_capacity_mw: None,
        }
    }

    pub fn fir_plsr() -> Self {
        Self::new(ReserveType::Fir, ProductType::Plsr)
    }

    pub fn sir_plsr() -> Self {
        Self::new(ReserveType::Sir, ProductType::Plsr)
    }

    pub fn fir_twdsr() -> Self {
        Self::new(ReserveType::Fir, ProductType::Twdsr)
    }

    pub fn sir_twdsr() -> Self {
        Self::new(ReserveType::Sir, ProductType::Twdsr)
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.price_threshold = Some(threshold);
        self
    }

    pub fn with_default_capacity(mut self, capacity_mw: u32) -> Self {
        self.default_capacity_mw = Some(capacity_mw);
        self
    }

    pub fn selects(&self, record: &OfferRecord) -> bool {
        record.reserve_type == self.reserve_type && record.product_type == self.product_type
    }
}
