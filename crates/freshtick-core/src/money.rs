//! # Money Module
//!
//! Provides the `Money` type for delivery charges, zone price overrides,
//! plan pricing and bottle deposits.
//!
//! ## Why Integer Paise?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A litre of milk at ₹56.50 on a 10% plan discount, 30 days a month     │
//! │                                                                         │
//! │  Floating point: 56.5 * 0.9 * 30 = 1525.4999999999998  ❌              │
//! │  Integer paise:  5650 → 5085 (discount rounded once) → 152550  ✅       │
//! │                                                                         │
//! │  Rounding happens at exactly one place per line, never drifts.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use freshtick_core::money::Money;
//!
//! let milk = Money::from_paise(5650); // ₹56.50
//! let weekly = milk * 7;
//! assert_eq!(weekly.paise(), 39550);
//! assert_eq!(milk.to_string(), "₹56.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in paise (1/100 of a rupee).
///
/// Signed so refunds and negative adjustments are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from paise.
    #[inline]
    pub const fn from_paise(paise: i64) -> Self {
        Money(paise)
    }

    /// Creates a Money value from whole rupees.
    ///
    /// ```rust
    /// use freshtick_core::money::Money;
    ///
    /// assert_eq!(Money::from_rupees(25).paise(), 2500);
    /// ```
    #[inline]
    pub const fn from_rupees(rupees: i64) -> Self {
        Money(rupees * 100)
    }

    /// Returns the value in paise.
    #[inline]
    pub const fn paise(&self) -> i64 {
        self.0
    }

    /// Returns the whole-rupee portion (truncated toward zero).
    #[inline]
    pub const fn rupees(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the paise portion (always 0-99).
    #[inline]
    pub const fn paise_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Applies a percentage discount given in basis points (1000 = 10%).
    ///
    /// The discount amount is rounded half-up before being subtracted.
    ///
    /// ## Example
    /// ```rust
    /// use freshtick_core::money::Money;
    ///
    /// let litre = Money::from_paise(5650);
    /// assert_eq!(litre.apply_discount_bps(1000).paise(), 5085);
    /// ```
    pub fn apply_discount_bps(&self, discount_bps: u32) -> Money {
        // i128 keeps large monthly totals from overflowing
        let discount = (self.0 as i128 * discount_bps as i128 + 5000) / 10000;
        Money(self.0 - discount as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}₹{}.{:02}",
            sign,
            self.rupees().abs(),
            self.paise_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_paise_and_parts() {
        let money = Money::from_paise(5650);
        assert_eq!(money.paise(), 5650);
        assert_eq!(money.rupees(), 56);
        assert_eq!(money.paise_part(), 50);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_paise(5650).to_string(), "₹56.50");
        assert_eq!(Money::from_rupees(30).to_string(), "₹30.00");
        assert_eq!(Money::from_paise(-2505).to_string(), "-₹25.05");
        assert_eq!(Money::zero().to_string(), "₹0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_paise(1000);
        let b = Money::from_paise(250);

        assert_eq!((a + b).paise(), 1250);
        assert_eq!((a - b).paise(), 750);
        assert_eq!((a * 3).paise(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.paise(), 1500);
    }

    #[test]
    fn test_discount_rounds_half_up() {
        // 5% of 1010 = 50.5 → 51 paise off
        assert_eq!(Money::from_paise(1010).apply_discount_bps(500).paise(), 959);
        assert_eq!(Money::from_paise(1000).apply_discount_bps(0).paise(), 1000);
        assert_eq!(Money::from_paise(1000).apply_discount_bps(10000).paise(), 0);
    }

    #[test]
    fn test_sign_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_paise(1).is_positive());
        assert!(Money::from_paise(-1).is_negative());
    }
}
