use crate::error::{OfferError, OfferResult};
use crate::models::{GroupKey, OfferRecord, StackedOffer};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Check that every record belongs to the same (timestamp, node) group.
///
/// Returns the group key, or `None` for an empty slice.
pub fn single_group(records: &[OfferRecord]) -> OfferResult<Option<GroupKey>> {
    let keys: BTreeSet<(NaiveDateTime, &str)> = records
        .iter()
        .map(|r| (r.timestamp, r.node.as_str()))
        .collect();

    match keys.len() {
        0 => Ok(None),
        1 => Ok(records.first().map(OfferRecord::group_key)),
        groups => Err(OfferError::InvalidGroupPartition { groups }),
    }
}

/// Split records into (timestamp, node) groups, keeping source order inside each.
pub fn partition_by_group<'a, I>(records: I) -> BTreeMap<GroupKey, Vec<OfferRecord>>
where
    I: IntoIterator<Item = &'a OfferRecord>,
{
    let mut groups: BTreeMap<GroupKey, Vec<OfferRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_key()).or_default().push(record.clone());
    }
    groups
}

/// Merit order: cheapest first, larger quantity first among equal prices.
pub fn merit_order(a: &OfferRecord, b: &OfferRecord) -> Ordering {
    a.price
        .total_cmp(&b.price)
        .then_with(|| b.quantity.total_cmp(&a.quantity))
}

/// Build the offer stack of a single (timestamp, node) group.
pub fn stack_offers(records: &[OfferRecord]) -> OfferResult<Vec<StackedOffer>> {
    single_group(records)?;

    let mut sorted = records.to_vec();
    sorted.sort_by(merit_order);

    let mut cumulative = 0.0;
    Ok(sorted
        .into_iter()
        .map(|offer| {
            cumulative += offer.quantity;
            StackedOffer {
                offer,
                cumulative_quantity: cumulative,
            }
        })
        .collect())
}

/// Stack every group independently and concatenate in group key order.
pub fn stack_all(records: &[OfferRecord]) -> OfferResult<Vec<StackedOffer>> {
    let mut stacked = Vec::with_capacity(records.len());
    for group in partition_by_group(records).into_values() {
        stacked.extend(stack_offers(&group)?);
    }
    Ok(stacked)
}

/// Map a price onto a `u64` with the same ordering, for use in sorted keys.
pub fn price_key(price: f64) -> u64 {
    let bits = price.to_bits();
    if price.is_sign_negative() {
        !bits
    } else {
        bits | (1 << 63)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStackEntry {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub quantity: f64,
}

/// Total quantity offered at each price in each trading period.
pub fn price_stack(records: &[OfferRecord]) -> Vec<PriceStackEntry> {
    let mut totals: BTreeMap<(NaiveDateTime, u64), (f64, f64)> = BTreeMap::new();
    for record in records {
        let entry = totals
            .entry((record.timestamp, price_key(record.price)))
            .or_insert((record.price, 0.0));
        entry.1 += record.quantity;
    }

    totals
        .into_iter()
        .map(|((timestamp, _), (price, quantity))| PriceStackEntry {
            timestamp,
            price,
            quantity,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ProductType, ReserveType};
    use chrono::NaiveDate;
    use std::sync::Arc;

    pub(crate) fn ts(period: u32) -> NaiveDateTime {
        crate::data_loader::trading_period_timestamp(
            NaiveDate::from_ymd_opt(2014, 1, 1).unwrap(),
            period,
        )
    }

    pub(crate) fn offer(node: &str, period: u32, price: f64, quantity: f64) -> OfferRecord {
        OfferRecord {
            node: node.to_string(),
            station: "HLY".to_string(),
            unit: "5".to_string(),
            timestamp: ts(period),
            product_type: ProductType::Energy,
            reserve_type: ReserveType::Energy,
            band: 1,
            price,
            quantity,
            percent: None,
            general: Arc::default(),
        }
    }

    pub(crate) fn reserve(node: &str, period: u32, price: f64, quantity: f64, percent: f64) -> OfferRecord {
        OfferRecord {
            product_type: ProductType::Plsr,
            reserve_type: ReserveType::Fir,
            percent: Some(percent),
            ..offer(node, period, price, quantity)
        }
    }

    #[test]
    fn test_stack_sorted_and_cumulative() {
        let records = vec![
            offer("A", 1, 50.0, 10.0),
            offer("A", 1, 10.0, 5.0),
            offer("A", 1, 10.0, 20.0),
            offer("A", 1, 0.01, 7.5),
        ];
        let stacked = stack_offers(&records).unwrap();

        let prices: Vec<f64> = stacked.iter().map(|s| s.offer.price).collect();
        assert_eq!(prices, vec![0.01, 10.0, 10.0, 50.0]);
        assert_eq!(stacked[1].offer.quantity, 20.0);
        assert_eq!(stacked[2].offer.quantity, 5.0);

        for pair in stacked.windows(2) {
            assert!(pair[1].cumulative_quantity >= pair[0].cumulative_quantity);
        }
        let total: f64 = records.iter().map(|r| r.quantity).sum();
        assert_eq!(stacked.last().unwrap().cumulative_quantity, total);
    }

    #[test]
    fn test_stack_rejects_mixed_groups() {
        let records = vec![offer("A", 1, 10.0, 5.0), offer("B", 1, 10.0, 5.0)];
        let err = stack_offers(&records).unwrap_err();
        assert!(matches!(err, OfferError::InvalidGroupPartition { groups: 2 }));
    }

    #[test]
    fn test_stack_all_restarts_per_group() {
        let records = vec![
            offer("A", 1, 10.0, 5.0),
            offer("B", 1, 10.0, 3.0),
            offer("A", 1, 20.0, 5.0),
            offer("A", 2, 5.0, 1.0),
        ];
        let stacked = stack_all(&records).unwrap();
        assert_eq!(stacked.len(), 4);

        let a1: Vec<f64> = stacked
            .iter()
            .filter(|s| s.offer.node == "A" && s.offer.timestamp == ts(1))
            .map(|s| s.cumulative_quantity)
            .collect();
        assert_eq!(a1, vec![5.0, 10.0]);

        let b1 = stacked.iter().find(|s| s.offer.node == "B").unwrap();
        assert_eq!(b1.cumulative_quantity, 3.0);
    }

    #[test]
    fn test_empty_stack() {
        assert!(stack_offers(&[]).unwrap().is_empty());
        assert_eq!(single_group(&[]).unwrap(), None);
    }

    #[test]
    fn test_price_stack_sums_by_price() {
        let records = vec![
            offer("A", 1, 10.0, 5.0),
            offer("B", 1, 10.0, 3.0),
            offer("A", 1, -1.0, 2.0),
            offer("A", 2, 10.0, 1.0),
        ];
        let stack = price_stack(&records);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[0].price, -1.0);
        assert_eq!(stack[1].price, 10.0);
        assert_eq!(stack[1].quantity, 8.0);
        assert_eq!(stack[2].timestamp, ts(2));
    }
}
