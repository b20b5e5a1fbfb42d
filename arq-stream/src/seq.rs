//! Modular sequence-number arithmetic.
//!
//! Sequence numbers are 16 bits wide and wrap around.  Ordering is defined
//! through the signed distance between two values: `a` precedes `b` when
//! `b - a (mod 2^16)`, read as an `i16`, is positive.  This is only
//! meaningful while the two values are less than `2^15` apart, which every
//! window in this crate guarantees (see [`crate::params::MAX_WINDOW_SIZE`]).

use std::fmt;

/// A 16-bit wrapping sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceNumber(pub u16);

impl SequenceNumber {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    /// The sequence number `n` steps after this one.
    #[inline]
    pub const fn add(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }

    /// The sequence number `n` steps before this one.
    #[inline]
    pub const fn sub(self, n: u16) -> Self {
        Self(self.0.wrapping_sub(n))
    }

    #[inline]
    pub const fn next(self) -> Self {
        self.add(1)
    }

    #[inline]
    pub const fn prev(self) -> Self {
        self.sub(1)
    }

    /// Signed distance from `self` to `other` (positive when `other` is ahead).
    #[inline]
    pub const fn distance_to(self, other: SequenceNumber) -> i16 {
        other.0.wrapping_sub(self.0) as i16
    }

    /// `true` when `self` comes strictly before `other` in wrap-around space.
    #[inline]
    pub const fn precedes(self, other: SequenceNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// `true` when `self` is before or equal to `other` in wrap-around space.
    #[inline]
    pub const fn precedes_or_eq(self, other: SequenceNumber) -> bool {
        self.distance_to(other) >= 0
    }

    /// `true` when `self` lies in the inclusive range `[low, high]`.
    #[inline]
    pub const fn within(self, low: SequenceNumber, high: SequenceNumber) -> bool {
        low.precedes_or_eq(self) && self.precedes_or_eq(high)
    }
}

impl From<u16> for SequenceNumber {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        let a = SequenceNumber(10);
        let b = SequenceNumber(11);
        assert!(a.precedes(b));
        assert!(!b.precedes(a));
        assert!(a.precedes_or_eq(a));
        assert!(!a.precedes(a));
    }

    #[test]
    fn ordering_across_wrap() {
        let before = SequenceNumber(u16::MAX - 1);
        let after = SequenceNumber(3);
        assert!(before.precedes(after));
        assert!(!after.precedes(before));
        assert_eq!(before.distance_to(after), 5);
        assert_eq!(after.distance_to(before), -5);
    }

    #[test]
    fn next_wraps_to_zero() {
        assert_eq!(SequenceNumber(u16::MAX).next(), SequenceNumber(0));
        assert_eq!(SequenceNumber(0).prev(), SequenceNumber(u16::MAX));
    }

    #[test]
    fn within_range_spanning_wrap() {
        let low = SequenceNumber(u16::MAX - 2);
        let high = SequenceNumber(2);
        assert!(SequenceNumber(u16::MAX).within(low, high));
        assert!(SequenceNumber(0).within(low, high));
        assert!(SequenceNumber(2).within(low, high));
        assert!(!SequenceNumber(3).within(low, high));
        assert!(!SequenceNumber(u16::MAX - 3).within(low, high));
    }
}
