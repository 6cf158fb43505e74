use crate::error::{OfferError, OfferResult};
use crate::models::{BandColumn, BandColumnKey, Parameter, ProductType, ReserveType};
use regex::Regex;
use std::sync::OnceLock;

const FIR_MARKER: &str = "6S";
const SIR_MARKER: &str = "60S";
const PLSR_MARKER: &str = "Plsr";
const TWDSR_MARKER: &str = "Twdsr";

fn band_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Band(\d+)").expect("static band pattern"))
}

fn has_token(column: &str, marker: &str) -> bool {
    column.split('_').any(|t| t.eq_ignore_ascii_case(marker))
}

/// Classify a wide band column such as `Band3_Plsr_6S_Max`.
///
/// Returns `MalformedColumnName` when the name carries `Band` without a
/// band number directly after it.
pub fn classify(column: &str) -> OfferResult<BandColumn> {
    let band = band_number_pattern()
        .captures(column)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| OfferError::MalformedColumnName {
            column: column.to_string(),
        })?;

    let token = column.rsplit('_').next().unwrap_or(column);

    Ok(BandColumn {
        key: BandColumnKey {
            product_type: product_type(column),
            reserve_type: reserve_type(column),
            band,
        },
        parameter: Parameter::from_token(token),
    })
}

pub fn reserve_type(column: &str) -> ReserveType {
    if has_token(column, FIR_MARKER) {
        ReserveType::Fir
    } else if has_token(column, SIR_MARKER) {
        ReserveType::Sir
    } else {
        ReserveType::Energy
    }
}

pub fn product_type(column: &str) -> ProductType {
    if has_token(column, PLSR_MARKER) {
        ProductType::Plsr
    } else if has_token(column, TWDSR_MARKER) {
        ProductType::Twdsr
    } else if has_token(column, FIR_MARKER) || has_token(column, SIR_MARKER) {
        ProductType::Il
    } else {
        ProductType::Energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_band() {
        let c = classify("Band5_Power").unwrap();
        assert_eq!(c.key.band, 5);
        assert_eq!(c.key.product_type, ProductType::Energy);
        assert_eq!(c.key.reserve_type, ReserveType::Energy);
        assert_eq!(c.parameter, Parameter::Quantity);
    }

    #[test]
    fn test_reserve_bands() {
        let c = classify("Band1_Plsr_6S_Max").unwrap();
        assert_eq!(c.key.product_type, ProductType::Plsr);
        assert_eq!(c.key.reserve_type, ReserveType::Fir);
        assert_eq!(c.parameter, Parameter::Quantity);

        let c = classify("Band12_Twdsr_60S_Percent").unwrap();
        assert_eq!(c.key.band, 12);
        assert_eq!(c.key.product_type, ProductType::Twdsr);
        assert_eq!(c.key.reserve_type, ReserveType::Sir);
        assert_eq!(c.parameter, Parameter::Percent);
    }

    #[test]
    fn test_interruptible_load() {
        let c = classify("Band2_60S_Price").unwrap();
        assert_eq!(c.key.product_type, ProductType::Il);
        assert_eq!(c.key.reserve_type, ReserveType::Sir);
        assert_eq!(c.parameter, Parameter::Price);
    }

    #[test]
    fn test_missing_band_number() {
        let err = classify("Band_Price").unwrap_err();
        assert!(matches!(err, OfferError::MalformedColumnName { .. }));
    }

    #[test]
    fn test_unknown_parameter_is_kept() {
        let c = classify("Band1_Plsr_6S_Ramp").unwrap();
        assert_eq!(c.parameter, Parameter::Other("Ramp".to_string()));
    }
}
