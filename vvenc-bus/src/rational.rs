use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Rate of the encoder's internal timestamp clock.
pub const TICKS_PER_SECOND: i32 = 90_000;

/// A time base or frame rate expressed as `numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational(pub i32, pub i32);

impl Rational {
    pub const fn new(numerator: i32, denominator: i32) -> Self {
        Self(numerator, denominator)
    }

    /// The encoder tick base, `1/90000`.
    pub const fn ticks() -> Self {
        Self(1, TICKS_PER_SECOND)
    }

    pub fn numerator(&self) -> i32 {
        self.0
    }

    pub fn denominator(&self) -> i32 {
        self.1
    }

    pub fn invert(&self) -> Self {
        Self(self.1, self.0)
    }

    /// Both terms strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0 && self.1 > 0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / self.1 as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self(0, 1)
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Rescales `value` from time base `from` to time base `to`, rounding to the
/// nearest integer with halves away from zero.
///
/// A degenerate target (zero numerator or source denominator) leaves the value
/// unchanged.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let mut b = from.0 as i128 * to.1 as i128;
    let mut c = from.1 as i128 * to.0 as i128;
    if c == 0 {
        return value;
    }
    if c < 0 {
        b = -b;
        c = -c;
    }
    let r = value as i128 * b;
    let rounded = if r >= 0 {
        (r + c / 2) / c
    } else {
        -((-r + c / 2) / c)
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_exact() {
        let tb = Rational::new(1, 25);
        assert_eq!(rescale(1, tb, Rational::ticks()), 3600);
        assert_eq!(rescale(3600, Rational::ticks(), tb), 1);
        assert_eq!(rescale(-2, tb, Rational::ticks()), -7200);
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        // 1/2 of a unit
        assert_eq!(rescale(1, Rational::new(1, 2), Rational::new(1, 1)), 1);
        assert_eq!(rescale(-1, Rational::new(1, 2), Rational::new(1, 1)), -1);
        assert_eq!(rescale(1, Rational::new(1, 3), Rational::new(1, 1)), 0);
    }

    #[test]
    fn test_round_trip_within_one_tick() {
        let bases = [
            Rational::new(1, 25),
            Rational::new(1, 1000),
            Rational::new(1001, 30000),
            Rational::new(1, 7),
        ];
        for tb in bases {
            for pts in [0i64, 1, 2, 13, 999, 123_456, -5] {
                let ticks = rescale(pts, tb, Rational::ticks());
                let back = rescale(ticks, Rational::ticks(), tb);
                assert!((back - pts).abs() <= 1, "tb {} pts {} -> {} -> {}", tb, pts, ticks, back);
            }
        }
    }

    #[test]
    fn test_degenerate_target_keeps_value() {
        assert_eq!(rescale(42, Rational::new(1, 25), Rational::new(0, 1)), 42);
    }
}
