use crate::allocator::{AllocationMatrix, CapacityAllocator};
use crate::capacity_mapper::CapacityMapper;
use crate::error::{OfferError, OfferResult};
use crate::incrementalizer::{incrementalize_stack, IndexedIncrement};
use crate::models::{FanConfig, FanRow, GroupKey, OfferRecord, MAX_UNIT_MW};
use crate::offer_stack::{partition_by_group, price_key, stack_offers};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Joins a unit's energy stack with its reserve allocation, one
/// (timestamp, node) group at a time.
pub struct FanCurveBuilder<'a> {
    config: FanConfig,
    capacities: Option<&'a CapacityMapper>,
}

impl<'a> FanCurveBuilder<'a> {
    pub fn new(config: FanConfig) -> Self {
        Self {
            config,
            capacities: None,
        }
    }

    pub fn with_capacities(mut self, capacities: &'a CapacityMapper) -> Self {
        self.capacities = Some(capacities);
        self
    }

    pub fn config(&self) -> &FanConfig {
        &self.config
    }

    /// Build the fan table for every (timestamp, node) group with energy offers.
    pub fn build(&self, records: &[OfferRecord]) -> OfferResult<Vec<FanRow>> {
        let energy = partition_by_group(
            records
                .iter()
                .filter(|r| r.is_energy() && r.quantity > 0.0),
        );
        let mut reserve = partition_by_group(
            records
                .iter()
                .filter(|r| self.config.selects(r) && r.quantity > 0.0),
        );

        let groups: Vec<(GroupKey, Vec<OfferRecord>, Vec<OfferRecord>)> = energy
            .into_iter()
            .map(|(key, energy)| {
                let offers = reserve.remove(&key).unwrap_or_default();
                (key, energy, offers)
            })
            .collect();

        info!(
            "Building {} {} fan curves for {} groups",
            self.config.product_type,
            self.config.reserve_type,
            groups.len()
        );

        let tables = groups
            .par_iter()
            .map(|(key, energy, reserve)| self.build_group(key, energy, reserve))
            .collect::<OfferResult<Vec<_>>>()?;

        Ok(tables.into_iter().flatten().collect())
    }

    /// Fan rows for one group. Empty reserve offers leave the energy rows
    /// with zero reserve.
    pub fn build_group(
        &self,
        key: &GroupKey,
        energy: &[OfferRecord],
        reserve: &[OfferRecord],
    ) -> OfferResult<Vec<FanRow>> {
        let stack = stack_offers(energy)?;

        let allocation = if reserve.is_empty() {
            None
        } else {
            let capacity = self.capacity_for(key, energy)?;
            Some(CapacityAllocator::new(capacity).allocate(reserve)?)
        };

        let increments = incrementalize_stack(&stack)?;

        debug!(
            "{}: {} energy increments, {} reserve offers",
            key,
            increments.len(),
            reserve.len()
        );

        Ok(dedup_rows(merge_group(key, &increments, allocation.as_ref())))
    }

    fn capacity_for(&self, key: &GroupKey, energy: &[OfferRecord]) -> OfferResult<u32> {
        if let Some(capacity) = self.capacities.and_then(|c| c.capacity_for(&key.node)) {
            return Ok(capacity);
        }
        if let Some(capacity) = self.config.default_capacity_mw {
            warn!("No capacity for {}, using default {} MW", key.node, capacity);
            return Ok(capacity);
        }
        let offered: f64 = energy.iter().map(|r| r.quantity).sum::<f64>().ceil().max(0.0);
        if offered > MAX_UNIT_MW as f64 {
            return Err(OfferError::QuantityOutOfRange {
                node: key.node.clone(),
                quantity: offered,
                limit: MAX_UNIT_MW,
            });
        }
        let capacity = offered as u32;
        warn!(
            "No capacity for {}, using offered energy {} MW",
            key.node, capacity
        );
        Ok(capacity)
    }
}

/// Outer join of energy increments and allocation cells on the MW index.
///
/// Every increment appears at least once; allocation cells past the end of
/// the energy stack appear with zero energy fields.
pub fn merge_group(
    key: &GroupKey,
    increments: &[IndexedIncrement],
    allocation: Option<&AllocationMatrix>,
) -> Vec<FanRow> {
    let by_index: BTreeMap<u32, &IndexedIncrement> = increments
        .iter()
        .map(|inc| (inc.cumulative_quantity, inc))
        .collect();

    let mut indices: BTreeSet<u32> = by_index.keys().copied().collect();
    if let Some(matrix) = allocation.filter(|m| !m.is_empty()) {
        indices.extend(1..=matrix.capacity());
    }

    let mut rows = Vec::new();
    for k in indices {
        let (price, increment_quantity) = by_index
            .get(&k)
            .map(|inc| (inc.increment.offer.price, inc.increment.increment_quantity))
            .unwrap_or((0.0, 0.0));

        let row = |reserve_price: f64, reserve_quantity: f64| FanRow {
            timestamp: key.timestamp,
            node: key.node.clone(),
            cumulative_quantity: k,
            price,
            reserve_price,
            reserve_quantity,
            increment_quantity,
        };

        let before = rows.len();
        if let Some(matrix) = allocation {
            rows.extend(
                matrix
                    .cells_at(k)
                    .map(|cell| row(cell.price, cell.marginal_reserve_quantity)),
            );
        }
        if rows.len() == before {
            rows.push(row(0.0, 0.0));
        }
    }
    rows
}

pub fn dedup_rows(rows: Vec<FanRow>) -> Vec<FanRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|r| {
            seen.insert((
                r.timestamp,
                r.node.clone(),
                r.cumulative_quantity,
                r.price.to_bits(),
                r.reserve_price.to_bits(),
                r.reserve_quantity.to_bits(),
                r.increment_quantity.to_bits(),
            ))
        })
        .collect()
}

/// A fan row restricted to reserve offered at or below a price cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub timestamp: NaiveDateTime,
    pub node: String,
    pub cumulative_quantity: u32,
    pub price: f64,
    pub increment_quantity: f64,
    pub reserve_quantity: f64,
    /// Running total of `reserve_quantity` along the group's MW axis.
    pub cumulative_reserve: f64,
    pub price_threshold: f64,
}

/// Collapse a fan table to the reserve available at no more than `threshold`.
pub fn aggregate_threshold(rows: &[FanRow], threshold: f64) -> Vec<ThresholdRow> {
    let mut totals: BTreeMap<(NaiveDateTime, String, u32, u64), ThresholdRow> = BTreeMap::new();

    for row in rows {
        let reserve_quantity = if row.reserve_price > threshold {
            0.0
        } else {
            row.reserve_quantity
        };

        let key = (
            row.timestamp,
            row.node.clone(),
            row.cumulative_quantity,
            price_key(row.price),
        );
        let entry = totals.entry(key).or_insert_with(|| ThresholdRow {
            timestamp: row.timestamp,
            node: row.node.clone(),
            cumulative_quantity: row.cumulative_quantity,
            price: row.price,
            increment_quantity: row.increment_quantity,
            reserve_quantity: 0.0,
            cumulative_reserve: 0.0,
            price_threshold: threshold,
        });
        entry.increment_quantity = entry.increment_quantity.max(row.increment_quantity);
        entry.reserve_quantity += reserve_quantity;
    }

    let mut aggregated: Vec<ThresholdRow> = totals.into_values().collect();

    let mut running = 0.0;
    let mut current: Option<(NaiveDateTime, String)> = None;
    for row in &mut aggregated {
        let group = (row.timestamp, row.node.clone());
        if current.as_ref() != Some(&group) {
            running = 0.0;
            current = Some(group);
        }
        running += row.reserve_quantity;
        row.cumulative_reserve = running;
    }

    aggregated
}
