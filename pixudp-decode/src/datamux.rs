//! Datamux readout decoder.
//!
//! With datamux compression every hit of a telescope layer arrives as three
//! words: trigger (sub-type 1), timing with the column (sub-type 2) and
//! address with the row (sub-type 3). The high nibble of the first byte
//! names the layer. Words with layer 0 (single-chip setups) are merged into
//! every channel in order.

use crate::align::{Lookahead, NibbleAligner};
use crate::decoder::{ReadoutMode, WordDecoder, WordOutcome};
use crate::word::{be_field, high_nibble, low_nibble, HexWord, Word, WINDOW_SIZE};
use log::warn;
use pixudp_core::hit::{COLUMNS, SHORT_TS2_RANGE, SHORT_TS_RANGE};
use pixudp_core::{remap_row, ChannelOffsets, Completion, Hit, MAX_CHANNELS};

/// Decoder for the multiplexed four-channel readout.
#[derive(Debug, Clone)]
pub struct DatamuxDecoder {
    records: [Hit; MAX_CHANNELS],
    active: [bool; MAX_CHANNELS],
    offsets: ChannelOffsets,
    aligner: NibbleAligner,
}

fn fresh_records() -> [Hit; MAX_CHANNELS] {
    [Hit::new(1), Hit::new(2), Hit::new(3), Hit::new(4)]
}

#[allow(clippy::cast_possible_truncation)]
fn layer_of(index: usize) -> i16 {
    // index < MAX_CHANNELS
    index as i16 + 1
}

fn merge_trigger(hit: &mut Hit, word: &Word) {
    hit.trigger_ts = be_field(&word[1..6]);
    hit.trigger_index = be_field(&word[6..8]);
    hit.completion.insert(Completion::TRIGGER);
}

#[allow(clippy::cast_possible_truncation)]
fn merge_timing(hit: &mut Hit, word: &Word) {
    hit.ts2 = be_field(&word[1..6]);
    hit.short_ts2 = (hit.ts2 % SHORT_TS2_RANGE) as i16;
    hit.column = COLUMNS - 1 - i16::from(word[6]);
    hit.trigger_index += i64::from(word[7]) << 16;
    hit.completion.insert(Completion::TIMING);
}

#[allow(clippy::cast_possible_truncation)]
fn merge_address(hit: &mut Hit, word: &Word, package_id: i32) {
    hit.fifo_overflow = word[1] & 0x80 != 0;
    hit.row = remap_row(i16::from(word[1] & 1) * 256 + i16::from(word[2]));
    hit.ts = be_field(&word[3..8]);
    hit.short_ts = (hit.ts % SHORT_TS_RANGE) as i16;
    hit.package_id = package_id;
    hit.completion.insert(Completion::ADDRESS);
}

impl DatamuxDecoder {
    /// Creates a decoder.
    ///
    /// `udp_bug` enables the byte resynchronization of the frame scanner.
    #[must_use]
    pub fn new(udp_bug: bool, offsets: ChannelOffsets) -> Self {
        Self {
            records: fresh_records(),
            active: [false; MAX_CHANNELS],
            offsets,
            aligner: NibbleAligner::new(udp_bug, NibbleAligner::DATAMUX_LIMIT),
        }
    }

    /// Record under construction for a layer (1-4).
    #[must_use]
    pub fn record(&self, layer: usize) -> Option<&Hit> {
        layer.checked_sub(1).and_then(|index| self.records.get(index))
    }

    /// Takes the record of a channel out, leaving a fresh one behind.
    ///
    /// Records with an address off the matrix or a garbage fine timestamp are
    /// discarded; accepted ones get the channel's offsets.
    fn release(&mut self, index: usize) -> WordOutcome {
        let mut hit = std::mem::replace(&mut self.records[index], Hit::new(layer_of(index)));
        if hit.has_valid_address() && hit.has_plausible_ts2() {
            self.offsets.apply(index, &mut hit);
            self.active[index] = true;
            WordOutcome::Hit(hit)
        } else {
            WordOutcome::Discarded(hit)
        }
    }

    fn decode_channel(&mut self, index: usize, word: &Word, package_id: i32) -> WordOutcome {
        let mut outcome = WordOutcome::Pending;

        match low_nibble(word[0]) {
            1 => {
                // a record completed by broadcast words is only released here
                if self.records[index].is_complete() {
                    outcome = self.release(index);
                }
                merge_trigger(&mut self.records[index], word);
            }
            2 => merge_timing(&mut self.records[index], word),
            3 => merge_address(&mut self.records[index], word, package_id),
            _ => {
                warn!(
                    "Unexpected datamux word (is datamux turned off?): {}",
                    HexWord(word)
                );
                return WordOutcome::Unexpected { marker: word[0] };
            }
        }

        let completion = self.records[index].completion;
        if completion == Completion::STALE {
            // address without timing: the timing word was lost
            let stale = std::mem::replace(&mut self.records[index], Hit::new(layer_of(index)));
            return WordOutcome::Discarded(stale);
        }
        if self.records[index].is_complete() {
            return self.release(index);
        }
        outcome
    }

    fn broadcast(&mut self, word: &Word, package_id: i32) {
        for record in &mut self.records {
            match record.completion.bits() {
                0 => merge_trigger(record, word),
                1 => merge_timing(record, word),
                3 => merge_address(record, word, package_id),
                _ => {}
            }
        }
    }
}

impl WordDecoder for DatamuxDecoder {
    fn mode(&self) -> ReadoutMode {
        ReadoutMode::Datamux
    }

    fn decode_word(&mut self, word: &Word, package_id: i32) -> WordOutcome {
        let layer = usize::from(high_nibble(word[0]));
        if (1..=MAX_CHANNELS).contains(&layer) {
            self.decode_channel(layer - 1, word, package_id)
        } else {
            self.broadcast(word, package_id);
            WordOutcome::Pending
        }
    }

    fn align(
        &mut self,
        window: &[u8; WINDOW_SIZE],
        start: usize,
        lookahead: Lookahead,
    ) -> Option<usize> {
        self.aligner.find(window, start, lookahead)
    }

    fn finish_buffer(&mut self) -> Vec<WordOutcome> {
        // channels that produced nothing in this buffer start over
        for (index, active) in self.active.iter_mut().enumerate() {
            if !*active {
                self.records[index] = Hit::new(layer_of(index));
            }
            *active = false;
        }
        Vec::new()
    }

    fn reset(&mut self) {
        self.records = fresh_records();
        self.active = [false; MAX_CHANNELS];
    }
}
