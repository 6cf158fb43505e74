pub mod allocator;
pub mod band_classifier;
pub mod capacity_mapper;
pub mod data_loader;
pub mod error;
pub mod fan_curve;
pub mod filters;
pub mod frames;
pub mod incrementalizer;
pub mod location_mapper;
pub mod models;
pub mod offer_stack;
pub mod reshaper;

pub use allocator::{AllocationMatrix, CapacityAllocator};
pub use capacity_mapper::CapacityMapper;
pub use data_loader::DataLoader;
pub use error::{OfferError, OfferResult};
pub use fan_curve::{aggregate_threshold, FanCurveBuilder, ThresholdRow};
pub use filters::OfferFilter;
pub use location_mapper::LocationMapper;
pub use models::{
    AllocationCell, BandColumnKey, FanConfig, FanRow, OfferRecord, ProductType, ReserveType,
    WideTable,
};
pub use reshaper::{reshape, RecordReshaper};
