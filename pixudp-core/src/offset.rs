//! Per-channel timestamp offset correction.

use crate::hit::{SHORT_TS2_RANGE, SHORT_TS_RANGE};
use crate::{Error, Hit, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of channels (telescope layers) on one stream.
pub const MAX_CHANNELS: usize = 4;

/// Additive corrections for the two timestamps of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimestampOffset {
    /// Offset of the coarse timestamp.
    pub ts: i64,
    /// Offset of the fine timestamp.
    pub ts2: i64,
}

impl TimestampOffset {
    /// Creates a new offset pair.
    #[must_use]
    pub fn new(ts: i64, ts2: i64) -> Self {
        Self { ts, ts2 }
    }

    /// Applies the offsets to a finished hit.
    ///
    /// The extended timestamps are shifted, the wrapped ones are shifted
    /// and folded back into `[0, 1024)` and `[0, 128)`.
    pub fn apply(&self, hit: &mut Hit) {
        hit.ts += self.ts;
        hit.short_ts = wrap(i64::from(hit.short_ts) + self.ts, SHORT_TS_RANGE);
        hit.ts2 += self.ts2;
        hit.short_ts2 = wrap(i64::from(hit.short_ts2) + self.ts2, SHORT_TS2_RANGE);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn wrap(value: i64, range: i64) -> i16 {
    // rem_euclid keeps the result in [0, range), range <= 1024 fits i16
    value.rem_euclid(range) as i16
}

/// Offsets for every channel of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelOffsets {
    offsets: [TimestampOffset; MAX_CHANNELS],
}

impl ChannelOffsets {
    /// Creates a set of zero offsets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the offsets of a channel; unknown channels are not corrected.
    #[must_use]
    pub fn get(&self, channel: usize) -> TimestampOffset {
        self.offsets.get(channel).copied().unwrap_or_default()
    }

    /// Sets the offsets of a channel.
    ///
    /// # Errors
    /// Returns an error if the channel index is out of range.
    pub fn set(&mut self, channel: usize, offset: TimestampOffset) -> Result<()> {
        let slot = self
            .offsets
            .get_mut(channel)
            .ok_or(Error::InvalidChannel {
                index: channel,
                max: MAX_CHANNELS,
            })?;
        *slot = offset;
        Ok(())
    }

    /// Sets the offsets of a telescope layer (1-4).
    ///
    /// # Errors
    /// Returns an error if the layer is outside 1..=4.
    pub fn set_layer(&mut self, layer: i64, offset: TimestampOffset) -> Result<()> {
        match usize::try_from(layer) {
            Ok(layer @ 1..=MAX_CHANNELS) => self.set(layer - 1, offset),
            _ => Err(Error::InvalidLayer(layer)),
        }
    }

    /// Applies the channel's offsets to a finished hit.
    pub fn apply(&self, channel: usize, hit: &mut Hit) {
        self.get(channel).apply(hit);
    }

    /// Returns true if no channel carries a correction.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.offsets.iter().all(|o| *o == TimestampOffset::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit_with(short_ts: i16, short_ts2: i16) -> Hit {
        let mut hit = Hit::new(1);
        hit.ts = 5000;
        hit.ts2 = 700;
        hit.short_ts = short_ts;
        hit.short_ts2 = short_ts2;
        hit
    }

    #[test]
    fn test_apply_positive_wraps() {
        let mut hit = hit_with(1000, 120);
        TimestampOffset::new(30, 10).apply(&mut hit);
        assert_eq!(hit.ts, 5030);
        assert_eq!(hit.short_ts, 6);
        assert_eq!(hit.ts2, 710);
        assert_eq!(hit.short_ts2, 2);
    }

    #[test]
    fn test_apply_negative_wraps() {
        let mut hit = hit_with(5, 3);
        TimestampOffset::new(-10, -4).apply(&mut hit);
        assert_eq!(hit.short_ts, 1019);
        assert_eq!(hit.short_ts2, 127);
        assert_eq!(hit.ts, 4990);
    }

    #[test]
    fn test_short_forms_stay_in_range() {
        for ts in [0_i16, 1, 511, 1023] {
            for offset in [-5000_i64, -1024, -1, 0, 1, 1023, 4096, 9999] {
                let mut hit = hit_with(ts, ts % 128);
                TimestampOffset::new(offset, offset).apply(&mut hit);
                assert_eq!(
                    i64::from(hit.short_ts),
                    (i64::from(ts) + offset).rem_euclid(1024)
                );
                assert!((0..128).contains(&hit.short_ts2));
            }
        }
    }

    #[test]
    fn test_channel_offsets() {
        let mut offsets = ChannelOffsets::new();
        assert!(offsets.is_zero());
        offsets.set(2, TimestampOffset::new(4, 2)).unwrap();
        assert_eq!(offsets.get(2), TimestampOffset::new(4, 2));
        assert_eq!(offsets.get(7), TimestampOffset::default());
        assert!(offsets.set(4, TimestampOffset::new(1, 1)).is_err());

        offsets.set_layer(1, TimestampOffset::new(-1, 0)).unwrap();
        assert_eq!(offsets.get(0).ts, -1);
        assert!(offsets.set_layer(0, TimestampOffset::default()).is_err());
        assert!(offsets.set_layer(5, TimestampOffset::default()).is_err());
    }
}
