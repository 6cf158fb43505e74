use crate::error::{OfferError, OfferResult};
use crate::models::{AllocationCell, GroupKey, OfferRecord, MAX_UNIT_MW};
use crate::offer_stack::single_group;
use log::debug;

/// Percent assumed for reserve offers that carry no percentage column.
pub const UNCAPPED_PERCENT: f64 = 100.0;

/// Marginal reserve per capacity increment and price tier for one group.
///
/// The capacity line is evaluated at `k = 0..=capacity`; `k = 0` is the zero
/// anchor and cells exist for `k = 1..=capacity`. Summing a tier's cells
/// over `1..=k` gives the reserve that tier supplies at increment `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationMatrix {
    pub group: Option<GroupKey>,
    capacity: u32,
    prices: Vec<f64>,
    // [tier][k - 1]
    marginal: Vec<Vec<f64>>,
}

impl AllocationMatrix {
    fn empty(group: Option<GroupKey>, capacity: u32) -> Self {
        Self {
            group,
            capacity,
            prices: Vec::new(),
            marginal: Vec::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Distinct offer prices, ascending.
    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty() || self.capacity == 0
    }

    pub fn marginal(&self, increment: u32, tier: usize) -> f64 {
        if increment == 0 || increment > self.capacity {
            return 0.0;
        }
        self.marginal
            .get(tier)
            .map(|line| line[increment as usize - 1])
            .unwrap_or(0.0)
    }

    /// Reserve supplied by one price tier at increment `k`.
    pub fn tier_quantity(&self, increment: u32, tier: usize) -> f64 {
        let upto = increment.min(self.capacity) as usize;
        self.marginal
            .get(tier)
            .map(|line| line[..upto].iter().sum())
            .unwrap_or(0.0)
    }

    /// Reserve supplied by all tiers together at increment `k`.
    pub fn total_at(&self, increment: u32) -> f64 {
        (0..self.prices.len())
            .map(|tier| self.tier_quantity(increment, tier))
            .sum()
    }

    pub fn cells_at(&self, increment: u32) -> impl Iterator<Item = AllocationCell> + '_ {
        self.prices
            .iter()
            .enumerate()
            .map(move |(tier, &price)| AllocationCell {
                capacity_increment: increment,
                price,
                marginal_reserve_quantity: self.marginal(increment, tier),
            })
            .filter(move |_| increment >= 1 && increment <= self.capacity)
    }

    /// All cells, ordered by increment then price.
    pub fn cells(&self) -> Vec<AllocationCell> {
        (1..=self.capacity).flat_map(|k| self.cells_at(k)).collect()
    }
}

/// The "bathtub" allocator: reserve offers fill the unit's capacity in merit
/// order, each limited by its percentage of the energy output, its own
/// quantity, and the headroom left above the energy output.
pub struct CapacityAllocator {
    capacity: u32,
}

impl CapacityAllocator {
    pub fn new(capacity: u32) -> Self {
        Self { capacity }
    }

    pub fn allocate(&self, offers: &[OfferRecord]) -> OfferResult<AllocationMatrix> {
        let group = single_group(offers)?;
        let capacity = self.capacity;
        if capacity == 0 || offers.is_empty() {
            return Ok(AllocationMatrix::empty(group, capacity));
        }
        if capacity > MAX_UNIT_MW {
            return Err(OfferError::QuantityOutOfRange {
                node: group.map(|g| g.node).unwrap_or_default(),
                quantity: capacity as f64,
                limit: MAX_UNIT_MW,
            });
        }

        let mut sorted: Vec<&OfferRecord> = offers.iter().collect();
        sorted.sort_by(|a, b| a.price.total_cmp(&b.price));

        let len = capacity as usize + 1;
        let headroom: Vec<f64> = (0..len).map(|k| (capacity as usize - k) as f64).collect();
        let mut reserve_line = vec![0.0; len];
        let mut previous_total = vec![0.0; len];

        let mut prices: Vec<f64> = Vec::new();
        let mut marginal: Vec<Vec<f64>> = Vec::new();

        for offer in sorted {
            let percent = offer.percent.unwrap_or(UNCAPPED_PERCENT);

            let mut total = vec![0.0; len];
            for k in 0..len {
                let proportional = k as f64 * percent / 100.0;
                reserve_line[k] += proportional.min(offer.quantity);
                total[k] = reserve_line[k].min(headroom[k]);
            }

            let marginal_total: Vec<f64> = total
                .iter()
                .zip(&previous_total)
                .map(|(t, p)| t - p)
                .collect();
            let per_increment: Vec<f64> = marginal_total.windows(2).map(|w| w[1] - w[0]).collect();

            // Equal prices arrive together, so they share the last tier.
            match prices.last() {
                Some(&last) if last == offer.price => {
                    if let Some(tier) = marginal.last_mut() {
                        for (acc, value) in tier.iter_mut().zip(&per_increment) {
                            *acc += value;
                        }
                    }
                }
                _ => {
                    prices.push(offer.price);
                    marginal.push(per_increment);
                }
            }

            previous_total = total;
        }

        debug!(
            "Allocated {} reserve offers over {} MW into {} price tiers",
            offers.len(),
            capacity,
            prices.len()
        );

        Ok(AllocationMatrix {
            group,
            capacity,
            prices,
            marginal,
        })
    }
}

pub fn allocate(capacity: u32, offers: &[OfferRecord]) -> OfferResult<AllocationMatrix> {
    CapacityAllocator::new(capacity).allocate(offers)
}
