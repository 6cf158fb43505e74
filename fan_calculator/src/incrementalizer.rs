use crate::error::{OfferError, OfferResult};
use crate::models::{IncrementRecord, OfferRecord, StackedOffer, MAX_UNIT_MW};
use serde::Serialize;

/// Split one offer into 1 MW increments; a fractional remainder becomes the last one.
///
/// An offer of `q` MW yields `ceil(q)` increments. Zero (or negative)
/// quantities yield none; anything above [`MAX_UNIT_MW`] is rejected.
pub fn incrementalize(offer: &OfferRecord) -> OfferResult<Vec<IncrementRecord>> {
    let quantity = offer.quantity;
    if quantity.is_nan() || quantity <= 0.0 {
        return Ok(Vec::new());
    }
    if quantity > MAX_UNIT_MW as f64 {
        return Err(OfferError::QuantityOutOfRange {
            node: offer.node.clone(),
            quantity,
            limit: MAX_UNIT_MW,
        });
    }

    let count = quantity.ceil() as usize;
    let remainder = quantity - quantity.floor();

    let increments = (0..count)
        .map(|i| {
            let increment_quantity = if i + 1 == count && remainder > 0.0 {
                remainder
            } else {
                1.0
            };
            IncrementRecord {
                offer: offer.clone(),
                increment_quantity,
            }
        })
        .collect();
    Ok(increments)
}

/// An increment positioned on the group's MW axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedIncrement {
    /// 1-based ordinal of the increment within the stack.
    pub cumulative_quantity: u32,
    pub increment: IncrementRecord,
}

/// Incrementalize a stacked group in stack order and number the increments.
pub fn incrementalize_stack(stack: &[StackedOffer]) -> OfferResult<Vec<IndexedIncrement>> {
    let mut increments = Vec::new();
    for stacked in stack {
        increments.extend(incrementalize(&stacked.offer)?);
    }
    Ok(increments
        .into_iter()
        .enumerate()
        .map(|(i, increment)| IndexedIncrement {
            cumulative_quantity: i as u32 + 1,
            increment,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer_stack::{stack_offers, tests::offer};

    fn total(rows: &[IncrementRecord]) -> f64 {
        rows.iter().map(|r| r.increment_quantity).sum()
    }

    #[test]
    fn test_fractional_quantity() {
        let rows = incrementalize(&offer("A", 1, 10.0, 43.7)).unwrap();
        assert_eq!(rows.len(), 44);
        assert!(rows[..43].iter().all(|r| r.increment_quantity == 1.0));
        assert!((rows[43].increment_quantity - 0.7).abs() < 1e-9);
        assert!((total(&rows) - 43.7).abs() < 1e-9);
    }

    #[test]
    fn test_integral_quantity() {
        let rows = incrementalize(&offer("A", 1, 10.0, 3.0)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(total(&rows), 3.0);
    }

    #[test]
    fn test_small_and_zero_quantity() {
        let rows = incrementalize(&offer("A", 1, 10.0, 0.25)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].increment_quantity, 0.25);

        assert!(incrementalize(&offer("A", 1, 10.0, 0.0)).unwrap().is_empty());
    }

    #[test]
    fn test_stack_indices_follow_merit_order() {
        let stack = stack_offers(&[offer("A", 1, 80.0, 2.0), offer("A", 1, 5.0, 1.5)]).unwrap();
        let rows = incrementalize_stack(&stack).unwrap();

        let indices: Vec<u32> = rows.iter().map(|r| r.cumulative_quantity).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(rows[0].increment.offer.price, 5.0);
        assert_eq!(rows[1].increment.increment_quantity, 0.5);
        assert_eq!(rows[2].increment.offer.price, 80.0);
    }

    #[test]
    fn test_oversized_quantity_is_rejected() {
        let err = incrementalize(&offer("A", 1, 10.0, 1e10)).unwrap_err();
        assert!(matches!(err, OfferError::QuantityOutOfRange { limit: MAX_UNIT_MW, .. }));

        let err = incrementalize(&offer("A", 1, 10.0, f64::INFINITY)).unwrap_err();
        assert!(matches!(err, OfferError::QuantityOutOfRange { .. }));

        let rows = incrementalize(&offer("A", 1, 10.0, MAX_UNIT_MW as f64)).unwrap();
        assert_eq!(rows.len(), MAX_UNIT_MW as usize);
    }
}
