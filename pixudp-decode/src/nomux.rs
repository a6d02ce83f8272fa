//! Non-multiplexed readout decoder.
//!
//! Without datamux compression a hit is spread over seven words with the
//! sub-types 6-12 in the low nibble. Each sets one completion bit; the hit is
//! finished when all seven have arrived.

use crate::align::{Lookahead, NibbleAligner};
use crate::decoder::{ReadoutMode, WordDecoder, WordOutcome};
use crate::word::{be_field, high_nibble, low_nibble, HexWord, Word, WINDOW_SIZE};
use log::warn;
use pixudp_core::hit::COLUMNS;
use pixudp_core::{remap_row, ChannelOffsets, Completion, Hit, MAX_CHANNELS};

/// Decoder for the non-multiplexed readout.
#[derive(Debug, Clone)]
pub struct NomuxDecoder {
    records: [Hit; MAX_CHANNELS],
    active: [bool; MAX_CHANNELS],
    offsets: ChannelOffsets,
    aligner: NibbleAligner,
}

fn fresh_records() -> [Hit; MAX_CHANNELS] {
    [Hit::new(1), Hit::new(2), Hit::new(3), Hit::new(4)]
}

/// Rebuilds the row address from the scrambled row and short TS2 fields.
///
/// The chip shifts the two lowest row bits into the row field (swapped) and
/// the remaining seven into the short TS2 field (reversed).
#[must_use]
pub fn unscramble_row(raw_row: i16, raw_short_ts2: i16) -> i16 {
    let mut row = i16::from(raw_row & 2 != 0) + i16::from(raw_row & 1 != 0) * 2;
    for i in 0..7 {
        if raw_short_ts2 & (64 >> i) != 0 {
            row += 4 << i;
        }
    }
    remap_row(row)
}

impl NomuxDecoder {
    /// Creates a decoder.
    ///
    /// `udp_bug` enables the byte resynchronization of the frame scanner.
    #[must_use]
    pub fn new(udp_bug: bool, offsets: ChannelOffsets) -> Self {
        Self {
            records: fresh_records(),
            active: [false; MAX_CHANNELS],
            offsets,
            aligner: NibbleAligner::new(udp_bug, NibbleAligner::NOMUX_LIMIT),
        }
    }

    /// Record under construction for a layer (1-4).
    #[must_use]
    pub fn record(&self, layer: usize) -> Option<&Hit> {
        layer.checked_sub(1).and_then(|index| self.records.get(index))
    }
}

impl WordDecoder for NomuxDecoder {
    fn mode(&self) -> ReadoutMode {
        ReadoutMode::Nomux
    }

    fn decode_word(&mut self, word: &Word, package_id: i32) -> WordOutcome {
        let layer = high_nibble(word[0]);
        if usize::from(layer) > MAX_CHANNELS {
            warn!("Word with invalid layer {layer}: {}", HexWord(word));
            return WordOutcome::Unexpected { marker: word[0] };
        }
        // layer 0 is a single-chip setup on the first channel
        let index = usize::from(layer.saturating_sub(1));
        let record = &mut self.records[index];

        match low_nibble(word[0]) {
            6 => {
                record.column = COLUMNS - 1 - i16::from(word[1]);
                record.completion.insert(Completion::COLUMN);
            }
            7 => {
                record.row = i16::from(word[1] & 1) * 256;
                record.completion.insert(Completion::ROW_HIGH);
            }
            8 => {
                record.row |= i16::from(word[1]);
                record.trigger_index = be_field(&word[5..8]);
                record.completion.insert(Completion::ROW_LOW);
            }
            9 => {
                record.short_ts = i16::from(word[1] & 3) * 256;
                record.trigger_ts = be_field(&word[5..8]);
                record.completion.insert(Completion::TS_HIGH);
            }
            10 => {
                record.short_ts |= i16::from(word[1]);
                record.ts2 = be_field(&word[3..8]);
                record.completion.insert(Completion::TS_LOW);
            }
            11 => {
                record.ts = be_field(&word[3..8]);
                record.completion.insert(Completion::EXT_TS);
            }
            12 => {
                record.short_ts2 = i16::from(word[1] & 0x7F);
                record.completion.insert(Completion::SHORT_TS2);
            }
            _ => {
                warn!(
                    "Unexpected nomux word (is datamux turned on?): {}",
                    HexWord(word)
                );
                return WordOutcome::Unexpected { marker: word[0] };
            }
        }

        if record.completion != Completion::NOMUX_COMPLETE {
            return WordOutcome::Pending;
        }

        let mut hit = std::mem::replace(record, Hit::new(i16::from(layer)));
        hit.row = unscramble_row(hit.row, hit.short_ts2);
        // ts2 stays as read out
        hit.package_id = package_id;

        if hit.has_valid_address() {
            self.offsets.apply(index, &mut hit);
            self.active[index] = true;
            WordOutcome::Hit(hit)
        } else {
            WordOutcome::Discarded(hit)
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
        for (record, active) in self.records.iter_mut().zip(self.active.iter_mut()) {
            if !*active {
                *record = Hit::new(record.layer);
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
