//! Odds string parsing.
//!
//! Race cards publish prices as fractional (`5/2`), decimal (`3.5`) or
//! word forms (`EVS`). Everything is converted to decimal odds; markers
//! that are not a price (`SP`, `SCR`, ...) become `None`.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a textual price into decimal odds.
///
/// Returns `None` for non-price markers, unparseable text and values at or
/// below 1.0.
pub fn parse_odds(text: &str) -> Option<Decimal> {
    let normalized = text.trim().to_uppercase();

    let value = match normalized.as_str() {
        "" | "SP" | "SCR" | "SCRATCHED" | "NR" | "-" => None,
        "EVS" | "EVENS" | "EVEN" => Some(Decimal::TWO),
        s if s.contains('/') => parse_fractional(s),
        s => Decimal::from_str(s).ok(),
    };

    value.filter(|v| *v > Decimal::ONE)
}

/// Parse a JSON number as decimal odds.
pub fn odds_from_number(n: &serde_json::Number) -> Option<Decimal> {
    Decimal::from_str(&n.to_string())
        .ok()
        .filter(|v| *v > Decimal::ONE)
}

fn parse_fractional(s: &str) -> Option<Decimal> {
    let (num, den) = s.split_once('/')?;
    if den.contains('/') {
        return None;
    }
    let num = Decimal::from_str(num.trim()).ok()?;
    let den = Decimal::from_str(den.trim()).ok()?;
    if den <= Decimal::ZERO || num < Decimal::ZERO {
        return None;
    }
    Some(Decimal::ONE + num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fractional() {
        assert_eq!(parse_odds("5/2"), Some(dec!(3.5)));
        assert_eq!(parse_odds(" 11/4 "), Some(dec!(3.75)));
        assert_eq!(parse_odds("1/2"), Some(dec!(1.5)));
    }

    #[test]
    fn test_evens() {
        assert_eq!(parse_odds("EVS"), Some(dec!(2)));
        assert_eq!(parse_odds("evens"), Some(dec!(2)));
    }

    #[test]
    fn test_decimal_string() {
        assert_eq!(parse_odds("4.0"), Some(dec!(4.0)));
    }

    #[test]
    fn test_non_prices() {
        for s in ["SP", "scr", "Scratched", "", "   ", "NR", "abc", "5/0", "1/2/3", "-1/2"] {
            assert_eq!(parse_odds(s), None, "{s:?} should not parse");
        }
    }

    #[test]
    fn test_values_at_or_below_one_rejected() {
        assert_eq!(parse_odds("1.0"), None);
        assert_eq!(parse_odds("0.5"), None);
        assert_eq!(parse_odds("0/1"), None);
    }

    #[test]
    fn test_from_number() {
        let n: serde_json::Number = serde_json::from_str("3.5").unwrap();
        assert_eq!(odds_from_number(&n), Some(dec!(3.5)));
        let one: serde_json::Number = serde_json::from_str("1").unwrap();
        assert_eq!(odds_from_number(&one), None);
    }
}
