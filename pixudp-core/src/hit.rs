//! Hit record reconstructed from the readout stream.

use crate::Completion;
use std::cmp::Ordering;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of pixel columns of the matrix.
pub const COLUMNS: i16 = 132;
/// Number of pixel rows of the matrix.
pub const ROWS: i16 = 372;
/// Rows below this value are read out mirrored and have to be flipped.
pub const ROW_MIRROR_LIMIT: i16 = 186;
/// Range of the wrapped coarse timestamp.
pub const SHORT_TS_RANGE: i64 = 1024;
/// Range of the wrapped fine timestamp.
pub const SHORT_TS2_RANGE: i64 = 128;
/// Fine timestamps at or above this value are readout garbage.
pub const MAX_PLAUSIBLE_TS2: i64 = 18_000_000;

/// Value of every numeric field that has not been decoded yet.
pub const UNSET: i64 = -1;

/// Maps a raw row address to the physical row.
///
/// The lower half of the matrix is addressed in reverse order.
#[inline]
#[must_use]
pub fn remap_row(raw: i16) -> i16 {
    if raw < ROW_MIRROR_LIMIT {
        ROW_MIRROR_LIMIT - 1 - raw
    } else {
        raw
    }
}

/// One detector hit, possibly still under construction.
///
/// Numeric fields hold `-1` until the sub-word carrying them was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hit {
    /// Telescope layer (1-4), 0 for a single-chip setup.
    pub layer: i16,
    /// Pixel column.
    pub column: i16,
    /// Pixel row.
    pub row: i16,
    /// Coarse timestamp wrapped to 10 bits.
    pub short_ts: i16,
    /// Coarse timestamp of the hit word itself (triggered format 2 only).
    pub short_ts1: i16,
    /// Fine timestamp wrapped to 7 bits.
    pub short_ts2: i16,
    /// Extended coarse timestamp in clock cycles.
    pub ts: i64,
    /// Extended fine timestamp.
    pub ts2: i64,
    /// Trigger index.
    pub trigger_index: i64,
    /// Trigger counter value.
    pub trigger_ts: i64,
    /// The FPGA readout FIFO overflowed (data was lost upstream).
    pub fifo_overflow: bool,
    /// Package id of the frame that completed the hit.
    pub package_id: i32,
    /// Trigger tag (triggered readout only).
    pub trigger_tag: i16,
    /// The chip's trigger table FIFO was full (triggered readout only).
    pub trigger_fifo_full: bool,
    /// Sub-words merged into this record so far.
    pub completion: Completion,
}

impl Default for Hit {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Hit {
    /// Creates an empty record for the given layer.
    #[must_use]
    pub fn new(layer: i16) -> Self {
        Self {
            layer,
            column: -1,
            row: -1,
            short_ts: -1,
            short_ts1: -1,
            short_ts2: -1,
            ts: UNSET,
            ts2: UNSET,
            trigger_index: UNSET,
            trigger_ts: UNSET,
            fifo_overflow: false,
            package_id: -1,
            trigger_tag: -1,
            trigger_fifo_full: false,
            completion: Completion::NONE,
        }
    }

    /// Returns true if the record carries every sub-word of its readout mode.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::BYTE_MODE_COMPLETE
            || self.completion == Completion::NOMUX_COMPLETE
    }

    /// Returns true if the pixel address lies on the matrix.
    #[inline]
    #[must_use]
    pub fn has_valid_address(&self) -> bool {
        (0..COLUMNS).contains(&self.column) && (0..ROWS).contains(&self.row)
    }

    /// Returns true if the fine timestamp is below the plausibility ceiling.
    #[inline]
    #[must_use]
    pub fn has_plausible_ts2(&self) -> bool {
        self.ts2 < MAX_PLAUSIBLE_TS2
    }

    /// Orders hits by coarse timestamp, then column, then row.
    #[must_use]
    pub fn cmp_by_time(&self, other: &Self) -> Ordering {
        self.ts
            .cmp(&other.ts)
            .then(self.column.cmp(&other.column))
            .then(self.row.cmp(&other.row))
    }

    /// Computes the time over threshold from the wrapped timestamps.
    ///
    /// The dividers are the clock divider settings of the TS1 and TS2
    /// counters (0 means "no division").
    #[must_use]
    pub fn time_over_threshold(&self, ts1_clock_div: u16, ts2_clock_div: u16) -> i32 {
        const TS1_SIZE: i32 = 1024;
        const TS2_SIZE: i32 = 128;

        let ts1_scale = i32::from(ts1_clock_div) + 1;
        let ts2_scale = i32::from(ts2_clock_div) + 1;
        let ts1_period = TS1_SIZE * ts1_scale;
        let ts2_period = TS2_SIZE * ts2_scale;
        let overflow = ts2_period.min(ts1_period);

        let ts1 = (i32::from(self.short_ts) * ts1_scale) % ts2_period;
        let ts2 = (i32::from(self.short_ts2) * ts2_scale) % ts1_period;

        let tot = ts2 - ts1;
        if tot < 0 {
            tot + overflow
        } else {
            tot
        }
    }
}

/// Sorts hits by time, keeping the arrival order of equal keys.
pub fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(Hit::cmp_by_time);
}
