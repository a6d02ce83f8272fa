//! Completion flags of a hit under construction.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Set of sub-words already merged into a hit record.
///
/// A record is finished only when the flags *equal* the readout mode's target
/// value; extra or missing bits both mean "not finished".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Completion(u16);

impl Completion {
    /// No sub-word seen yet.
    pub const NONE: Self = Self(0);

    /// Trigger information (byte-oriented readout modes).
    pub const TRIGGER: Self = Self(1 << 0);
    /// Fine timestamp / timing word (byte-oriented readout modes).
    pub const TIMING: Self = Self(1 << 1);
    /// Pixel address (byte-oriented readout modes).
    pub const ADDRESS: Self = Self(1 << 2);
    /// Target value of the datamux and triggered readout modes.
    pub const BYTE_MODE_COMPLETE: Self = Self(0b111);
    /// Trigger info and address without timing: a stale combination.
    pub const STALE: Self = Self(0b101);

    /// Non-multiplexed sub-word 6: column.
    pub const COLUMN: Self = Self(1 << 5);
    /// Non-multiplexed sub-word 7: row high bit.
    pub const ROW_HIGH: Self = Self(1 << 6);
    /// Non-multiplexed sub-word 8: row low byte and trigger index.
    pub const ROW_LOW: Self = Self(1 << 7);
    /// Non-multiplexed sub-word 9: short timestamp high bits and trigger counter.
    pub const TS_HIGH: Self = Self(1 << 8);
    /// Non-multiplexed sub-word 10: short timestamp low byte and fine timestamp.
    pub const TS_LOW: Self = Self(1 << 9);
    /// Non-multiplexed sub-word 11: coarse timestamp.
    pub const EXT_TS: Self = Self(1 << 10);
    /// Non-multiplexed sub-word 12: short fine timestamp.
    pub const SHORT_TS2: Self = Self(1 << 11);
    /// Target value of the non-multiplexed readout mode.
    pub const NOMUX_COMPLETE: Self = Self(0b1111_1110_0000);

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Creates a flag set from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns true if every flag of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags of `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags of `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns true if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Completion {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Completion {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}
