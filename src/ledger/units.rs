//! Conversion between display units ("1.5 PLX") and raw ledger amounts.

use super::{Amount, MAX_DECIMALS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {value:?} has more than {decimals} fractional digits")]
    TooPrecise { value: String, decimals: u32 },
    #[error("amount {0:?} overflows the ledger amount type")]
    Overflow(String),
    #[error("decimals {0} exceeds the maximum of {MAX_DECIMALS}")]
    Decimals(u32),
}

/// Scaling factor for one display unit.
pub fn unit_scale(decimals: u32) -> Result<Amount, UnitsError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::Decimals(decimals));
    }
    Ok(10u128.pow(decimals))
}

pub fn parse_units(value: &str, decimals: u32) -> Result<Amount, UnitsError> {
    let scale = unit_scale(decimals)?;
    let cleaned: String = value.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, fraction) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(UnitsError::Empty);
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return Err(UnitsError::InvalidDigit(value.to_string()));
    }
    if fraction.len() > decimals as usize {
        return Err(UnitsError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let overflow = || UnitsError::Overflow(value.to_string());
    let whole_raw = if whole.is_empty() {
        0
    } else {
        whole.parse::<Amount>().map_err(|_| overflow())?
    };
    let mut fraction_raw: Amount = 0;
    if !fraction.is_empty() {
        let padding = decimals as usize - fraction.len();
        fraction_raw = fraction.parse::<Amount>().map_err(|_| overflow())?;
        fraction_raw = fraction_raw
            .checked_mul(10u128.pow(padding as u32))
            .ok_or_else(overflow)?;
    }
    whole_raw
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_raw))
        .ok_or_else(overflow)
}

/// Renders a raw amount in display units, trimming trailing fractional zeros.
pub fn format_units(raw: Amount, decimals: u32) -> String {
    let Ok(scale) = unit_scale(decimals) else {
        return raw.to_string();
    };
    let whole = raw / scale;
    let fraction = raw % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Amount = 1_000_000_000_000_000_000;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_units("1", 18).unwrap(), ONE);
        assert_eq!(parse_units("1.5", 18).unwrap(), ONE + ONE / 2);
        assert_eq!(parse_units(".25", 18).unwrap(), ONE / 4);
        assert_eq!(parse_units("1_000", 0).unwrap(), 1_000);
        assert_eq!(parse_units("0.000000000000000001", 18).unwrap(), 1);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert_eq!(parse_units(".", 18), Err(UnitsError::Empty));
        assert!(matches!(parse_units("1e5", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("-1", 18), Err(UnitsError::InvalidDigit(_))));
        assert!(matches!(parse_units("0.123", 2), Err(UnitsError::TooPrecise { .. })));
        assert!(matches!(
            parse_units("999999999999999999999999", 18),
            Err(UnitsError::Overflow(_))
        ));
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(format_units(ONE * 3, 18), "3");
        assert_eq!(format_units(ONE + ONE / 2, 18), "1.5");
        assert_eq!(format_units(1, 18), "0.000000000000000001");
        assert_eq!(format_units(42, 0), "42");
    }
}
