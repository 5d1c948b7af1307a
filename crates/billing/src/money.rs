//! Currency rounding and invoice arithmetic.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round to 2 decimal places, half away from zero.
///
/// Currency convention: 0.125 rounds to 0.13, not to the even 0.12.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Invoice totals derived from line prices and a tax rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Compute invoice totals: each line is rounded to 2 decimal places before
/// summation, tax is the rounded product of subtotal and rate, and the total
/// is rounded once more.
pub fn invoice_totals(prices: impl IntoIterator<Item = Decimal>, tax_rate: Decimal) -> Totals {
    let subtotal: Decimal = prices.into_iter().map(round2).sum();
    let tax = round2(subtotal * tax_rate);
    let total = round2(subtotal + tax);

    Totals { subtotal, tax, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(mantissa: i64, scale: u32) -> Decimal {
        Decimal::new(mantissa, scale)
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(dec(125, 3)), dec(13, 2)); // 0.125 -> 0.13
        assert_eq!(round2(dec(135, 3)), dec(14, 2)); // 0.135 -> 0.14
        assert_eq!(round2(dec(1244, 3)), dec(124, 2)); // 1.244 -> 1.24
    }

    #[test]
    fn lines_round_before_summation() {
        // 10.004 + 10.004 rounds per line (10.00 + 10.00), not on the sum.
        let totals = invoice_totals([dec(10004, 3), dec(10004, 3)], Decimal::ZERO);
        assert_eq!(totals.subtotal, dec(2000, 2));
        assert_eq!(totals.total, dec(2000, 2));
    }

    #[test]
    fn tax_is_rounded_once() {
        // 700.00 at 7.5%: tax 52.50, total 752.50.
        let totals = invoice_totals([dec(50000, 2), dec(20000, 2)], dec(75, 3));
        assert_eq!(totals.subtotal, dec(70000, 2));
        assert_eq!(totals.tax, dec(5250, 2));
        assert_eq!(totals.total, dec(75250, 2));
    }

    #[test]
    fn midpoint_tax_rounds_up() {
        // 0.10 at 25%: raw tax 0.025 rounds to 0.03 (banker's would say 0.02).
        let totals = invoice_totals([dec(10, 2)], dec(25, 2));
        assert_eq!(totals.tax, dec(3, 2));
        assert_eq!(totals.total, dec(13, 2));
    }
}
