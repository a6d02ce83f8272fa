//! Byte resynchronization for streams hit by the byte duplication bug.
//!
//! The UDP readout occasionally sends one byte twice, which shifts every
//! following word by one byte. The frame scanner keeps the last two words in
//! a 16-byte window and asks the active decoder's aligner at which offset the
//! next word really starts.

use crate::word::{high_nibble, low_nibble, WINDOW_SIZE, WORD_SIZE};

/// Whether a candidate offset must be confirmed by the following word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookahead {
    /// The byte one word later must look like a word start as well.
    Required,
    /// Only the candidate itself is checked (last usable window).
    Waived,
}

/// Aligner for the byte-oriented readout modes (datamux and nomux).
///
/// A word start has a source nibble below 5 and a non-zero sub-type nibble
/// below the mode's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NibbleAligner {
    enabled: bool,
    sub_type_limit: u8,
}

impl NibbleAligner {
    /// Sub-type limit of the datamux readout (sub-types 1-3).
    pub const DATAMUX_LIMIT: u8 = 4;
    /// Sub-type limit of the nomux readout (sub-types 6-12).
    pub const NOMUX_LIMIT: u8 = 13;

    /// Creates an aligner; a disabled one always reports offset 0.
    #[must_use]
    pub fn new(enabled: bool, sub_type_limit: u8) -> Self {
        Self {
            enabled,
            sub_type_limit,
        }
    }

    /// Returns true if the byte can start a word.
    #[inline]
    #[must_use]
    pub fn is_word_start(&self, byte: u8) -> bool {
        let sub_type = low_nibble(byte);
        high_nibble(byte) < 5 && sub_type != 0 && sub_type < self.sub_type_limit
    }

    /// Searches `start..8`, then `0..start`, for a valid word start.
    #[must_use]
    pub fn find(
        &self,
        window: &[u8; WINDOW_SIZE],
        start: usize,
        lookahead: Lookahead,
    ) -> Option<usize> {
        if !self.enabled {
            return Some(0);
        }

        let start = start.min(WORD_SIZE - 1);
        for pass in [start..WORD_SIZE, 0..start] {
            for offset in pass {
                if self.is_word_start(window[offset])
                    && (lookahead == Lookahead::Waived
                        || self.is_word_start(window[offset + WORD_SIZE]))
                {
                    return Some(offset);
                }
            }
        }
        None
    }
}

/// Aligner for the triggered readout.
///
/// Here the duplicated byte itself is the marker: a word start that appears
/// twice in a row means the real word begins one byte later. The aligner
/// remembers whether the previous round ended on such a double byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredAligner {
    enabled: bool,
    last_was_double: bool,
    last_offset: Option<usize>,
    excluded_marker: Option<u8>,
}

/// Returns true if `byte` has a word-start marker in `0x10..=0x40`.
#[inline]
fn is_marker(byte: u8, excluded: Option<u8>) -> bool {
    let marker = byte & 0xF0;
    (0x10..=0x40).contains(&marker) && Some(marker) != excluded
}

impl TriggeredAligner {
    /// Creates an aligner; a disabled one always reports offset 0.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_was_double: false,
            last_offset: None,
            excluded_marker: None,
        }
    }

    /// Forgets the alignment history.
    pub fn reset(&mut self) {
        self.last_was_double = false;
        self.last_offset = None;
        self.excluded_marker = None;
    }

    /// Excludes a hit-word marker once its format lost the format vote.
    ///
    /// The first exclusion sticks until [`reset`](Self::reset).
    pub fn exclude_marker(&mut self, marker: u8) {
        if self.excluded_marker.is_none() {
            self.excluded_marker = Some(marker);
        }
    }

    /// Currently excluded marker, if any.
    #[must_use]
    pub fn excluded_marker(&self) -> Option<u8> {
        self.excluded_marker
    }

    /// Returns true if the byte can start a word.
    #[inline]
    #[must_use]
    pub fn is_word_start(&self, byte: u8) -> bool {
        is_marker(byte, self.excluded_marker)
    }

    /// Searches `start..8`, then `0..start`, for the next word start.
    pub fn find(
        &mut self,
        window: &[u8; WINDOW_SIZE],
        start: usize,
        lookahead: Lookahead,
    ) -> Option<usize> {
        if !self.enabled {
            return Some(0);
        }

        let last = WORD_SIZE - 1;
        let waived = lookahead == Lookahead::Waived;
        let start = start.min(last);

        for pass in [start..WORD_SIZE, 0..start] {
            let pass_start = pass.start;
            for offset in pass {
                let byte = window[offset];
                if !self.is_word_start(byte) {
                    continue;
                }

                if byte == window[offset + 1] {
                    if offset == last
                        || waived
                        || window[offset + 9] == 0
                        || is_marker(window[offset + 9], None)
                    {
                        self.last_was_double = true;
                        if offset == last {
                            // the shifted word starts in the next window
                            self.last_offset = Some(0);
                            return None;
                        }
                        self.last_offset = Some(offset + 1);
                        return Some(offset + 1);
                    }
                } else if offset == pass_start && self.last_was_double {
                    if self.last_offset == Some(0) && pass_start == last {
                        continue;
                    }
                    let next = window[offset + WORD_SIZE];
                    if next == 0 || is_marker(next, None) {
                        if offset != 0 {
                            self.last_was_double = false;
                        }
                        self.last_offset = Some(offset);
                        return Some(offset);
                    }
                }
            }
        }

        match self.last_offset {
            Some(offset) if waived && self.is_word_start(window[offset]) => Some(offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(bytes: &[(usize, u8)]) -> [u8; WINDOW_SIZE] {
        let mut window = [0u8; WINDOW_SIZE];
        for &(index, value) in bytes {
            window[index] = value;
        }
        window
    }

    #[test]
    fn test_nibble_aligned_window() {
        let aligner = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let w = window(&[(0, 0x11), (8, 0x12)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), Some(0));
    }

    #[test]
    fn test_nibble_shifted_window_and_idempotence() {
        let aligner = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let w = window(&[(0, 0xA0), (1, 0xB0), (2, 0xC0), (3, 0x11), (11, 0x12)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), Some(3));

        let mut realigned = [0u8; WINDOW_SIZE];
        realigned[..WINDOW_SIZE - 3].copy_from_slice(&w[3..]);
        assert_eq!(aligner.find(&realigned, 0, Lookahead::Required), Some(0));
    }

    #[test]
    fn test_nibble_single_lookalike_rejected() {
        let aligner = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let w = window(&[(0, 0x21)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), None);
        assert_eq!(aligner.find(&w, 0, Lookahead::Waived), Some(0));
    }

    #[test]
    fn test_nibble_wraps_to_front() {
        let aligner = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let w = window(&[(2, 0x13), (10, 0x11)]);
        assert_eq!(aligner.find(&w, 5, Lookahead::Required), Some(2));
    }

    #[test]
    fn test_nibble_prefers_last_offset() {
        let aligner = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let w = window(&[(1, 0x21), (9, 0x22), (4, 0x13), (12, 0x11)]);
        assert_eq!(aligner.find(&w, 4, Lookahead::Required), Some(4));
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), Some(1));
    }

    #[test]
    fn test_nibble_mode_limits() {
        let w = window(&[(0, 0x1C), (8, 0x16)]);
        let datamux = NibbleAligner::new(true, NibbleAligner::DATAMUX_LIMIT);
        let nomux = NibbleAligner::new(true, NibbleAligner::NOMUX_LIMIT);
        assert_eq!(datamux.find(&w, 0, Lookahead::Required), None);
        assert_eq!(nomux.find(&w, 0, Lookahead::Required), Some(0));
        assert!(!nomux.is_word_start(0x10));
        assert!(!nomux.is_word_start(0x56));
    }

    #[test]
    fn test_disabled_aligners_report_zero() {
        let w = [0xFF; WINDOW_SIZE];
        assert_eq!(
            NibbleAligner::new(false, 4).find(&w, 3, Lookahead::Required),
            Some(0)
        );
        assert_eq!(
            TriggeredAligner::new(false).find(&w, 3, Lookahead::Required),
            Some(0)
        );
    }

    #[test]
    fn test_triggered_double_byte_marks_shift() {
        let mut aligner = TriggeredAligner::new(true);
        let w = window(&[(2, 0x30), (3, 0x30)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), Some(3));

        // without a new double byte the alignment is kept
        let w = window(&[(3, 0x10), (4, 0x55), (11, 0x20)]);
        assert_eq!(aligner.find(&w, 3, Lookahead::Required), Some(3));
    }

    #[test]
    fn test_triggered_needs_history() {
        let mut aligner = TriggeredAligner::new(true);
        let w = window(&[(0, 0x10), (1, 0x55), (8, 0x20)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), None);
        assert_eq!(aligner.find(&w, 0, Lookahead::Waived), None);
    }

    #[test]
    fn test_triggered_double_byte_at_word_end() {
        let mut aligner = TriggeredAligner::new(true);
        let w = window(&[(7, 0x20), (8, 0x20)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), None);

        // the remembered offset is now the window start
        let w = window(&[(0, 0x40), (1, 0x01)]);
        assert_eq!(aligner.find(&w, 0, Lookahead::Waived), Some(0));
    }

    #[test]
    fn test_triggered_excluded_marker() {
        let w = window(&[(0, 0x40), (1, 0x40)]);

        let mut aligner = TriggeredAligner::new(true);
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), Some(1));

        let mut aligner = TriggeredAligner::new(true);
        aligner.exclude_marker(0x40);
        aligner.exclude_marker(0x30);
        assert_eq!(aligner.excluded_marker(), Some(0x40));
        assert_eq!(aligner.find(&w, 0, Lookahead::Required), None);
    }
}
