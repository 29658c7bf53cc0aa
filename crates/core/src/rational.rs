// SPDX-FileCopyrightText: © 2025 Rivulet Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rational numbers for rate-like quantities.
//!
//! Frame rates, aspect ratios and playback rates all travel as `num/den`
//! pairs so that timestamp arithmetic stays exact. A zero numerator is the
//! conventional encoding for "paused" playback.

use serde::{Deserialize, Serialize};

/// An unsigned rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u64,
    pub den: u64,
}

impl Rational {
    /// The identity rate (normal playback, square pixels, ...).
    pub const ONE: Self = Self { num: 1, den: 1 };

    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// Returns true if the numerator or denominator is zero.
    ///
    /// A degenerate rational cannot scale a timestamp; trick play treats it
    /// as a pause.
    pub const fn is_zero(self) -> bool {
        self.num == 0 || self.den == 0
    }

    /// Reduces the fraction by the greatest common divisor.
    ///
    /// Comparisons with `==` are field-wise, so callers should simplify
    /// before comparing rationals from different origins.
    pub const fn simplify(self) -> Self {
        if self.num == 0 || self.den == 0 {
            return self;
        }
        let d = gcd(self.num, self.den);
        Self { num: self.num / d, den: self.den / d }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ONE
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplify_reduces_by_gcd() {
        assert_eq!(Rational::new(30_000, 1001).simplify(), Rational::new(30_000, 1001));
        assert_eq!(Rational::new(50, 100).simplify(), Rational::new(1, 2));
        assert_eq!(Rational::new(27_000_000, 90_000).simplify(), Rational::new(300, 1));
    }

    #[test]
    fn zero_numerator_is_pause() {
        assert!(Rational::new(0, 1).is_zero());
        assert!(Rational::new(1, 0).is_zero());
        assert!(!Rational::ONE.is_zero());
        assert_eq!(Rational::new(0, 4).simplify(), Rational::new(0, 4));
    }
}
