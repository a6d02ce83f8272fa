//! Triggered readout decoder.
//!
//! In triggered readout the chip sends pixel words as they are read out and
//! a trigger word once the trigger has been processed. Pixel words wait in
//! an incomplete queue until the next trigger word stamps them with the
//! trigger counter, then move to the complete queue in arrival order.
//!
//! Two pixel word layouts exist (sub-type 3 and 4). The layout in use is
//! learned from the data: the first one seen 50 times wins, afterwards the
//! other one is counted as a format error.

use crate::align::{Lookahead, TriggeredAligner};
use crate::decoder::{ReadoutMode, WordDecoder, WordOutcome};
use crate::word::{be_field, high_nibble, HexWord, Word, WINDOW_SIZE};
use log::debug;
use pixudp_core::hit::COLUMNS;
use pixudp_core::{gray_decode, remap_row, ChannelOffsets, Completion, Hit};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Number of pixel words after which a timestamp format is considered known.
pub const FORMAT_DECISION: u32 = 50;

/// Pixel word layout of the triggered readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TsFormat {
    /// Sub-type 3: 32-bit TS2 and a Gray-coded short TS2.
    Format1,
    /// Sub-type 4: 29-bit TS2 and a short TS1.
    Format2,
}

impl TsFormat {
    /// First-byte marker of pixel words in this format.
    #[must_use]
    pub fn marker(self) -> u8 {
        match self {
            TsFormat::Format1 => 0x30,
            TsFormat::Format2 => 0x40,
        }
    }

    /// The other format.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            TsFormat::Format1 => TsFormat::Format2,
            TsFormat::Format2 => TsFormat::Format1,
        }
    }
}

impl TryFrom<u8> for TsFormat {
    type Error = pixudp_core::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TsFormat::Format1),
            2 => Ok(TsFormat::Format2),
            other => Err(pixudp_core::Error::InvalidTsFormat(other)),
        }
    }
}

impl From<TsFormat> for u8 {
    fn from(format: TsFormat) -> Self {
        match format {
            TsFormat::Format1 => 1,
            TsFormat::Format2 => 2,
        }
    }
}

impl fmt::Display for TsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Pixel word counts per timestamp format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FormatVotes {
    format1: u32,
    format2: u32,
}

impl FormatVotes {
    fn forced(format: Option<TsFormat>) -> Self {
        match format {
            Some(TsFormat::Format1) => Self {
                format1: FORMAT_DECISION + 1,
                format2: 0,
            },
            Some(TsFormat::Format2) => Self {
                format1: 0,
                format2: FORMAT_DECISION + 1,
            },
            None => Self::default(),
        }
    }

    fn winner(self) -> Option<TsFormat> {
        if self.format1 >= FORMAT_DECISION {
            Some(TsFormat::Format1)
        } else if self.format2 >= FORMAT_DECISION {
            Some(TsFormat::Format2)
        } else {
            None
        }
    }

    /// Counts a word; returns false if the other format already won.
    fn cast(&mut self, format: TsFormat) -> bool {
        let (own, rival) = match format {
            TsFormat::Format1 => (&mut self.format1, self.format2),
            TsFormat::Format2 => (&mut self.format2, self.format1),
        };
        if rival < FORMAT_DECISION {
            *own += 1;
            true
        } else {
            false
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn gray(value: u32, bits: u32) -> i16 {
    // at most 10 bits
    gray_decode(value, bits) as i16
}

/// Decoder for the triggered single-chip readout.
#[derive(Debug, Clone)]
pub struct TriggeredDecoder {
    accumulator: Hit,
    incomplete: VecDeque<Hit>,
    complete: VecDeque<Hit>,
    votes: FormatVotes,
    forced_format: Option<TsFormat>,
    format_errors: u64,
    offsets: ChannelOffsets,
    aligner: TriggeredAligner,
}

impl TriggeredDecoder {
    /// Creates a decoder.
    ///
    /// `ts_format` skips the format vote and treats the other format as an
    /// error from the first word on.
    #[must_use]
    pub fn new(udp_bug: bool, offsets: ChannelOffsets, ts_format: Option<TsFormat>) -> Self {
        Self {
            accumulator: Hit::new(0),
            incomplete: VecDeque::new(),
            complete: VecDeque::new(),
            votes: FormatVotes::forced(ts_format),
            forced_format: ts_format,
            format_errors: 0,
            offsets,
            aligner: TriggeredAligner::new(udp_bug),
        }
    }

    /// Format that won the vote, if any.
    #[must_use]
    pub fn winning_format(&self) -> Option<TsFormat> {
        self.votes.winner()
    }

    /// Number of pixel words waiting for a trigger word.
    #[must_use]
    pub fn pending_pixels(&self) -> usize {
        self.incomplete.len()
    }

    fn merge_trigger(&mut self, word: &Word) {
        let hit = &mut self.accumulator;
        let counter = (i64::from(word[0] & 3) << 32) | be_field(&word[1..5]);
        hit.trigger_ts = (counter << 6) + i64::from((word[5] >> 2) & 0x3F);
        hit.short_ts = gray(u32::from(word[6] & 3) << 8 | u32::from(word[7]), 10);
        hit.trigger_tag = i16::from(word[5] & 3) * 32 + i16::from((word[6] >> 3) & 0x1F);
        hit.trigger_fifo_full = word[6] & 4 != 0;
        hit.completion.insert(Completion::TRIGGER);
    }

    fn merge_timing(&mut self, word: &Word) {
        let hit = &mut self.accumulator;
        hit.ts = be_field(&word[3..8]);
        hit.trigger_index = (i64::from(word[0] & 0x0F) << 16) | be_field(&word[1..3]);
        hit.completion.insert(Completion::TIMING);
    }

    fn merge_pixel(&mut self, word: &Word, format: TsFormat) {
        let hit = &mut self.accumulator;
        hit.column = COLUMNS - 1 - i16::from(word[7]);
        let raw_row = i16::from(word[5] & 1) * 256 + i16::from(word[6]);
        hit.row = remap_row(!raw_row & 0x1FF);

        match format {
            TsFormat::Format1 => {
                hit.ts2 = be_field(&word[1..5]);
                hit.short_ts2 = gray(u32::from(!(word[5] >> 1) & 0x7F), 7);
            }
            TsFormat::Format2 => {
                hit.short_ts1 = i16::from(word[4] & 7) * 128 + i16::from((word[5] >> 1) & 0x7F);
                let coarse = (i64::from(word[0] & 7) << 24) | be_field(&word[1..4]);
                hit.ts2 = (coarse << 5) + i64::from((word[4] >> 3) & 0x1F);
            }
        }
        hit.completion.insert(Completion::ADDRESS);

        if !self.votes.cast(format) {
            self.format_errors += 1;
            debug!(
                "Wrong timestamp format ({format}) found, {} errors",
                self.format_errors
            );
        }
    }

    /// Queues a finished pixel word.
    fn queue_pixel(&mut self, package_id: i32) {
        let hit = &mut self.accumulator;
        hit.package_id = package_id;
        if hit.has_valid_address() {
            self.incomplete.push_back(*hit);
        }
        hit.completion.remove(Completion::ADDRESS);
    }

    /// Stamps the waiting pixels with the trigger and releases the oldest.
    fn apply_trigger(&mut self) -> WordOutcome {
        let trigger = std::mem::replace(&mut self.accumulator, Hit::new(0));
        for hit in &mut self.incomplete {
            hit.trigger_ts = trigger.trigger_ts;
            hit.short_ts = trigger.short_ts;
            hit.trigger_tag = trigger.trigger_tag;
            hit.trigger_fifo_full = trigger.trigger_fifo_full;
            hit.completion.insert(Completion::TRIGGER);
        }
        self.complete.extend(self.incomplete.drain(..));

        match self.complete.pop_front() {
            Some(hit) => self.release(hit),
            None => WordOutcome::Pending,
        }
    }

    /// Applies the offsets to a hit leaving the complete queue.
    fn release(&self, mut hit: Hit) -> WordOutcome {
        self.offsets.apply(0, &mut hit);
        if hit.is_complete() {
            WordOutcome::Hit(hit)
        } else {
            WordOutcome::Discarded(hit)
        }
    }
}

impl WordDecoder for TriggeredDecoder {
    fn mode(&self) -> ReadoutMode {
        ReadoutMode::Triggered
    }

    fn decode_word(&mut self, word: &Word, package_id: i32) -> WordOutcome {
        match high_nibble(word[0]) {
            1 => self.merge_trigger(word),
            2 => self.merge_timing(word),
            3 => self.merge_pixel(word, TsFormat::Format1),
            4 => self.merge_pixel(word, TsFormat::Format2),
            _ => {
                debug!("Unexpected triggered word: {}", HexWord(word));
                return WordOutcome::Unexpected { marker: word[0] };
            }
        }

        if self.accumulator.completion.contains(Completion::ADDRESS) {
            self.queue_pixel(package_id);
        }
        if self.accumulator.completion.contains(Completion::TRIGGER) {
            return self.apply_trigger();
        }
        WordOutcome::Pending
    }

    fn align(
        &mut self,
        window: &[u8; WINDOW_SIZE],
        start: usize,
        lookahead: Lookahead,
    ) -> Option<usize> {
        if let Some(winner) = self.votes.winner() {
            self.aligner.exclude_marker(winner.other().marker());
        }
        self.aligner.find(window, start, lookahead)
    }

    fn finish_buffer(&mut self) -> Vec<WordOutcome> {
        let queued: Vec<Hit> = self.complete.drain(..).collect();
        queued.into_iter().map(|hit| self.release(hit)).collect()
    }

    fn reset(&mut self) {
        self.accumulator = Hit::new(0);
        self.incomplete.clear();
        self.complete.clear();
        self.votes = FormatVotes::forced(self.forced_format);
        self.format_errors = 0;
        self.aligner.reset();
    }

    fn format_errors(&self) -> u64 {
        self.format_errors
    }
}
