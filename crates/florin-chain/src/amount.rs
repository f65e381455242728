//! Monetary amounts.

use crate::{ChainError, ChainResult};

/// Amount in the base currency unit (a "mite"). Signed so that fee deltas
/// and the negative coinbase fee entry can be represented directly.
pub type Amount = i64;

/// Number of mites in one FLR.
pub const COIN: Amount = 1_000_000;

/// No amount larger than this is valid.
pub const MAX_MONEY: Amount = 2_000_000_000 * COIN;

/// Format an amount as a decimal FLR string, e.g. `1.50`.
pub fn format_money(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / COIN as u64;
    let frac = abs % COIN as u64;
    if frac == 0 {
        format!("{}{}.00", sign, whole)
    } else {
        let s = format!("{:06}", frac);
        format!("{}{}.{}", sign, whole, s.trim_end_matches('0'))
    }
}

/// Parse a decimal FLR string into an amount.
///
/// Accepts an optional fractional part of up to six digits. Rejects
/// negative values and values above [`MAX_MONEY`].
pub fn parse_money(s: &str) -> ChainResult<Amount> {
    let s = s.trim();
    let invalid = || ChainError::InvalidAmount(s.to_string());

    let (whole_str, frac_str) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole_str.is_empty() || frac_str.len() > 6 {
        return Err(invalid());
    }
    if !whole_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !frac_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: Amount = whole_str.parse().map_err(|_| invalid())?;
    let mut frac: Amount = 0;
    if !frac_str.is_empty() {
        frac = frac_str.parse().map_err(|_| invalid())?;
        for _ in frac_str.len()..6 {
            frac *= 10;
        }
    }

    let amount = whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(invalid)?;
    if amount > MAX_MONEY {
        return Err(invalid());
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(0), "0.00");
        assert_eq!(format_money(COIN), "1.00");
        assert_eq!(format_money(COIN + COIN / 2), "1.5");
        assert_eq!(format_money(-COIN / 4), "-0.25");
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("1").unwrap(), COIN);
        assert_eq!(parse_money("1.5").unwrap(), COIN + COIN / 2);
        assert_eq!(parse_money("0.000001").unwrap(), 1);
        assert!(parse_money("x").is_err());
        assert!(parse_money("1.0000001").is_err());
        assert!(parse_money("-1").is_err());
    }

    #[test]
    fn test_parse_format_round_trip() {
        for amount in [0, 1, COIN, 3 * COIN + 141_590] {
            assert_eq!(parse_money(&format_money(amount)).unwrap(), amount);
        }
    }
}
