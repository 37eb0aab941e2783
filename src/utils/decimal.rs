//! Decimal arithmetic utilities for financial calculations.
//!
//! All order sizing rounds *down* (truncation toward zero), never to
//! nearest: an order must never request more than the funding side can pay
//! for. Repeated slice accumulation stays drift-free because everything is
//! `rust_decimal::Decimal`, never binary floating point.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a quantity down to `decimals` fractional digits.
///
/// Idempotent: rounding an already-rounded value is a no-op, and the result
/// is always `<=` the input for non-negative inputs.
pub fn round_down_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Round down to lot size (e.g. 0.001 contracts).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Weighted average over `(value, weight)` pairs.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_down_truncates() {
        assert_eq!(round_down_to_precision(dec!(0.123456789), 8), dec!(0.12345678));
        assert_eq!(round_down_to_precision(dec!(1.999), 2), dec!(1.99));
        assert_eq!(round_down_to_precision(dec!(5), 0), dec!(5));
    }

    #[test]
    fn test_round_down_is_idempotent() {
        let x = dec!(0.100959595959);
        let once = round_down_to_precision(x, 8);
        let twice = round_down_to_precision(once, 8);
        assert_eq!(once, twice);
        assert!(once <= x);
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![(dec!(100), dec!(2)), (dec!(200), dec!(1))];
        let avg = weighted_average(&values);
        assert!(avg > dec!(133) && avg < dec!(134));
    }

    #[test]
    fn test_weighted_average_is_order_independent() {
        let a = vec![
            (dec!(-1.2), dec!(10000)),
            (dec!(-1.1), dec!(10000)),
            (dec!(-1.0), dec!(10000)),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(weighted_average(&a), weighted_average(&b));
        assert_eq!(weighted_average(&a), dec!(-1.1));
    }
}
