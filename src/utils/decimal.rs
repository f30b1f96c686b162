//! Decimal arithmetic utilities for price and sizing calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// `value * pct / 100`.
pub fn percent_of(value: Decimal, pct: Decimal) -> Decimal {
    value * pct / dec!(100)
}

/// Move a price by a signed percentage: `price * (1 + pct / 100)`.
pub fn shift_by_pct(price: Decimal, pct: Decimal) -> Decimal {
    price * (Decimal::ONE + pct / dec!(100))
}

/// Calculate percentage difference between two values.
pub fn percentage_diff(a: Decimal, b: Decimal) -> Decimal {
    if b == Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((a - b) / b).abs() * dec!(100)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

/// Element at `index`, repeating the last element past the end.
pub fn nth_or_last<T: Copy>(values: &[T], index: usize) -> Option<T> {
    values.get(index).or_else(|| values.last()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_by_pct() {
        assert_eq!(shift_by_pct(dec!(100), dec!(-5)), dec!(95));
        assert_eq!(shift_by_pct(dec!(100), dec!(2)), dec!(102));
        assert_eq!(percent_of(dec!(250), dec!(10)), dec!(25));
    }

    #[test]
    fn test_percentage_diff() {
        assert_eq!(percentage_diff(dec!(105), dec!(100)), dec!(5));
        assert_eq!(percentage_diff(dec!(95), dec!(100)), dec!(5));
        assert_eq!(percentage_diff(dec!(100), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(100), dec!(4)), dec!(25));
        assert_eq!(safe_div(dec!(100), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_weighted_average() {
        let values = vec![(dec!(100), dec!(25)), (dec!(90), dec!(75))];
        assert_eq!(weighted_average(&values), dec!(92.5));
    }

    #[test]
    fn test_nth_or_last() {
        let values = [dec!(5), dec!(10)];
        assert_eq!(nth_or_last(&values, 0), Some(dec!(5)));
        assert_eq!(nth_or_last(&values, 7), Some(dec!(10)));
        assert_eq!(nth_or_last::<Decimal>(&[], 0), None);
    }
}
