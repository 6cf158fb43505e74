use crate::models::{BandColumnKey, Parameter};
use thiserror::Error;

/// Errors raised while reshaping, stacking or allocating offers.
#[derive(Error, Debug)]
pub enum OfferError {
    /// A column mentions `Band` but no band number follows it.
    #[error("Malformed band column name: {column}")]
    MalformedColumnName { column: String },

    #[error("Required column missing from source schema: {column}")]
    MissingGeneralColumn { column: String },

    #[error("Band {key} has no {parameter} column")]
    IncompleteBand { key: BandColumnKey, parameter: Parameter },

    /// Input handed to a per-group operation spans several (timestamp, node) groups.
    #[error("Expected a single (timestamp, node) group, found {groups}")]
    InvalidGroupPartition { groups: usize },

    #[error("Invalid value {value:?} in column {column} at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    /// A quantity or capacity too large to lay out as 1 MW increments.
    #[error("{node}: {quantity} MW exceeds the {limit} MW unit limit")]
    QuantityOutOfRange {
        node: String,
        quantity: f64,
        limit: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

pub type OfferResult<T> = Result<T, OfferError>;
