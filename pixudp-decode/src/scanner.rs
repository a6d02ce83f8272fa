//! Frame scanner: splits buffers into words and feeds the active decoder.

use crate::align::Lookahead;
use crate::decoder::{ReadoutDecoder, ReadoutMode, WordDecoder, WordOutcome};
use crate::word::{
    is_empty, HexWord, Word, WordKind, TRAILING_MARGIN_OFFSET, WINDOW_SIZE, WORD_SIZE,
};
use crate::DecoderConfig;
use log::{debug, trace, warn};
use pixudp_core::Hit;
use serde::{Deserialize, Serialize};

/// Consecutive empty words after which a buffer is given up.
pub const MAX_FAILED_WORDS: u32 = 400;

/// Counters collected while decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeStats {
    /// Buffers passed to [`PackageDecoder::decode_buffer`].
    pub buffers: u64,
    /// Data words handed to the decoder.
    pub words: u64,
    /// Header words.
    pub headers: u64,
    /// Skipped empty words.
    pub empty_words: u64,
    /// Words for which no alignment was found.
    pub unaligned: u64,
    /// Words with a sub-type the readout mode does not know.
    pub protocol_violations: u64,
    /// Finished hits that were rejected.
    pub discarded: u64,
    /// Emitted hits.
    pub hits: u64,
    /// Buffers abandoned after too many empty words.
    pub aborted_buffers: u64,
    /// Triggered pixel words in the losing timestamp format.
    pub format_errors: u64,
}

impl DecodeStats {
    /// Adds the counters of another decoder.
    pub fn merge(&mut self, other: &DecodeStats) {
        self.buffers += other.buffers;
        self.words += other.words;
        self.headers += other.headers;
        self.empty_words += other.empty_words;
        self.unaligned += other.unaligned;
        self.protocol_violations += other.protocol_violations;
        self.discarded += other.discarded;
        self.hits += other.hits;
        self.aborted_buffers += other.aborted_buffers;
        self.format_errors += other.format_errors;
    }
}

/// Decodes UDP buffers into hits.
///
/// One instance handles one stream; per-channel decoder state carries over
/// from one buffer to the next. With the byte duplication workaround enabled,
/// words are decoded one word late through a 16-byte window. The word still
/// in the window at the end of a buffer is decoded before the buffer is
/// finished, so every buffer is decoded completely.
#[derive(Debug, Clone)]
pub struct PackageDecoder<D: WordDecoder = ReadoutDecoder> {
    decoder: D,
    udp_bug: bool,
    window: [u8; WINDOW_SIZE],
    /// The second half of the window holds a word not decoded yet.
    pending: bool,
    last_offset: usize,
    /// Offset of the last decode; bytes of the newer word before it are used.
    decoded_offset: usize,
    decoder_format_errors: u64,
    stats: DecodeStats,
}

impl PackageDecoder<ReadoutDecoder> {
    /// Creates a scanner with the decoder selected by the configuration.
    #[must_use]
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(ReadoutDecoder::from_config(config), config.udp_bug)
    }
}

impl<D: WordDecoder> PackageDecoder<D> {
    /// Creates a scanner around a decoder.
    pub fn new(decoder: D, udp_bug: bool) -> Self {
        Self {
            decoder,
            udp_bug,
            window: [0; WINDOW_SIZE],
            pending: false,
            last_offset: 0,
            decoded_offset: 0,
            decoder_format_errors: 0,
            stats: DecodeStats::default(),
        }
    }

    /// Readout mode of the wrapped decoder.
    pub fn mode(&self) -> ReadoutMode {
        self.decoder.mode()
    }

    /// The wrapped decoder.
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Counters since creation.
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Number of triggered pixel words in the losing timestamp format.
    pub fn format_errors(&self) -> u64 {
        self.stats.format_errors
    }

    /// Decodes one buffer and returns the hits in emission order.
    ///
    /// Trailing bytes that do not fill a word are ignored.
    pub fn decode_buffer(&mut self, buffer: &[u8]) -> Vec<Hit> {
        self.stats.buffers += 1;

        let mut hits = Vec::new();
        let mut package_id: i32 = -1;
        let mut after_header = false;
        let mut failed_words: u32 = 0;

        for (index, chunk) in buffer.chunks_exact(WORD_SIZE).enumerate() {
            let mut word: Word = [0; WORD_SIZE];
            word.copy_from_slice(chunk);

            if let WordKind::Header { package_id: id } = WordKind::of(&word) {
                package_id = i32::from(id);
                after_header = true;
                // a header is not empty data
                failed_words = 1;
                self.stats.headers += 1;
                continue;
            }

            let empty = is_empty(&word)
                || (self.udp_bug
                    && index * WORD_SIZE == TRAILING_MARGIN_OFFSET
                    && is_empty(&word[..WORD_SIZE - 1]));

            if !empty || after_header {
                after_header = false;
                failed_words = 0;
                self.stats.words += 1;
                trace!("Word {index} of package {package_id}: {}", HexWord(&word));

                if self.udp_bug {
                    self.decode_windowed(&word, package_id, &mut hits);
                } else {
                    let outcome = self.decoder.decode_word(&word, package_id);
                    self.record(outcome, &mut hits);
                }
            } else {
                after_header = false;
                failed_words += 1;
                self.stats.empty_words += 1;

                if failed_words > MAX_FAILED_WORDS {
                    warn!(
                        "Too many empty words ({MAX_FAILED_WORDS}) in a row, aborting buffer at byte {}",
                        index * WORD_SIZE
                    );
                    self.stats.aborted_buffers += 1;
                    break;
                }
            }
        }

        if self.udp_bug {
            self.flush_window(package_id, &mut hits);
        }
        for outcome in self.decoder.finish_buffer() {
            self.record(outcome, &mut hits);
        }
        self.count_format_errors();
        hits
    }

    /// Clears the decoder state and the alignment window.
    ///
    /// Counters are kept, format errors included.
    pub fn reset(&mut self) {
        self.count_format_errors();
        self.decoder.reset();
        self.decoder_format_errors = 0;
        self.window = [0; WINDOW_SIZE];
        self.pending = false;
        self.last_offset = 0;
        self.decoded_offset = 0;
    }

    /// Adds the format errors the decoder found since the last call.
    fn count_format_errors(&mut self) {
        let current = self.decoder.format_errors();
        self.stats.format_errors += current.saturating_sub(self.decoder_format_errors);
        self.decoder_format_errors = current;
    }

    /// Decodes the rest of the word still held in the window.
    ///
    /// The word is followed by zeros, so the lookahead is waived. The window
    /// starts empty again for the next buffer.
    fn flush_window(&mut self, package_id: i32, hits: &mut Vec<Hit>) {
        if self.pending && !is_empty(&self.window[WORD_SIZE + self.decoded_offset..]) {
            self.window.copy_within(WORD_SIZE.., 0);
            self.window[WORD_SIZE..].fill(0);
            match self
                .decoder
                .align(&self.window, self.decoded_offset, Lookahead::Waived)
            {
                Some(offset) if offset >= self.decoded_offset => {
                    self.decode_at(offset, package_id, hits);
                }
                _ => {
                    debug!(
                        "Unalignable last word in package {package_id}: {}",
                        HexWord(&self.window[..WORD_SIZE])
                    );
                    self.stats.unaligned += 1;
                }
            }
        }

        self.window = [0; WINDOW_SIZE];
        self.pending = false;
        self.last_offset = 0;
        self.decoded_offset = 0;
    }

    fn decode_windowed(&mut self, word: &Word, package_id: i32, hits: &mut Vec<Hit>) {
        self.window.copy_within(WORD_SIZE.., 0);
        self.window[WORD_SIZE..].copy_from_slice(word);

        // the first word of a buffer is decoded once its successor arrives
        if !self.pending {
            self.pending = true;
            return;
        }

        if let Some(offset) = self
            .decoder
            .align(&self.window, self.last_offset, Lookahead::Required)
        {
            self.last_offset = offset;
            self.decode_at(offset, package_id, hits);
        } else if let Some(offset) =
            self.decoder
                .align(&self.window, self.last_offset, Lookahead::Waived)
        {
            self.decode_at(offset, package_id, hits);
        } else {
            debug!(
                "Unalignable word in package {package_id}: {}",
                HexWord(&self.window)
            );
            self.stats.unaligned += 1;
        }
    }

    fn decode_at(&mut self, offset: usize, package_id: i32, hits: &mut Vec<Hit>) {
        let mut word: Word = [0; WORD_SIZE];
        word.copy_from_slice(&self.window[offset..offset + WORD_SIZE]);
        self.decoded_offset = offset;
        let outcome = self.decoder.decode_word(&word, package_id);
        self.record(outcome, hits);
    }

    fn record(&mut self, outcome: WordOutcome, hits: &mut Vec<Hit>) {
        match outcome {
            WordOutcome::Pending => {}
            WordOutcome::Hit(hit) => {
                self.stats.hits += 1;
                hits.push(hit);
            }
            WordOutcome::Discarded(hit) => {
                self.stats.discarded += 1;
                debug!(
                    "Discarded hit on layer {} (column {}, row {}, completion {})",
                    hit.layer, hit.column, hit.row, hit.completion
                );
            }
            WordOutcome::Unexpected { marker } => {
                self.stats.protocol_violations += 1;
                trace!("Protocol violation, marker {marker:#04x}");
            }
        }
    }
}
