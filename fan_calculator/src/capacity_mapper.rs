use crate::error::OfferResult;
use log::info;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// Maximum output per market node, used as the allocator's capacity line.
#[derive(Debug, Clone, Default)]
pub struct CapacityMapper {
    capacities: HashMap<String, u32>,
}

impl CapacityMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load node capacities from a reference CSV with `Node` and `Capacity` columns.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> OfferResult<Self> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        let nodes = df.column("Node")?.str()?;
        let capacities = df.column("Capacity")?.cast(&DataType::Float64)?;
        let capacities = capacities.f64()?;

        let mut mapper = Self::new();
        for idx in 0..df.height() {
            if let (Some(node), Some(capacity)) = (nodes.get(idx), capacities.get(idx)) {
                mapper.add_capacity(node.trim(), capacity.round().max(0.0) as u32);
            }
        }

        info!(
            "Loaded {} node capacities from {}",
            mapper.len(),
            path.display()
        );
        Ok(mapper)
    }

    pub fn add_capacity(&mut self, node: &str, capacity_mw: u32) {
        self.capacities.insert(node.to_string(), capacity_mw);
    }

    pub fn capacity_for(&self, node: &str) -> Option<u32> {
        self.capacities.get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.capacities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capacities.is_empty()
    }
}
