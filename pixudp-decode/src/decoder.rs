//! Common interface of the readout-mode decoders.

use crate::align::Lookahead;
use crate::datamux::DatamuxDecoder;
use crate::nomux::NomuxDecoder;
use crate::triggered::TriggeredDecoder;
use crate::word::{Word, WINDOW_SIZE};
use crate::DecoderConfig;
use pixudp_core::Hit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Readout mode of the front-end, selecting the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadoutMode {
    /// Up to four channels multiplexed onto one stream.
    #[default]
    Datamux,
    /// One channel per stream position, seven sub-words per hit.
    Nomux,
    /// Triggered readout with separate pixel and trigger words.
    Triggered,
}

impl fmt::Display for ReadoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadoutMode::Datamux => "datamux",
            ReadoutMode::Nomux => "nomux",
            ReadoutMode::Triggered => "triggered",
        };
        f.write_str(name)
    }
}

/// Result of feeding one data word to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordOutcome {
    /// The word was merged into a hit under construction.
    Pending,
    /// A hit was finished and passed validation.
    Hit(Hit),
    /// A hit was finished or flushed but rejected.
    Discarded(Hit),
    /// The word's sub-type is not valid for this readout mode.
    Unexpected {
        /// Raw first byte of the word.
        marker: u8,
    },
}

/// A per-readout-mode hit decoder.
///
/// Implementations own their per-channel state; the frame scanner owns the
/// word framing and the alignment window.
pub trait WordDecoder {
    /// Readout mode handled by this decoder.
    fn mode(&self) -> ReadoutMode;

    /// Merges one aligned data word into the decoder state.
    fn decode_word(&mut self, word: &Word, package_id: i32) -> WordOutcome;

    /// Finds the byte offset of the next word start inside the window.
    ///
    /// `start` is the last offset that decoded successfully.
    fn align(&mut self, window: &[u8; WINDOW_SIZE], start: usize, lookahead: Lookahead)
        -> Option<usize>;

    /// Called once at the end of every buffer; returns the hits released
    /// there, rejected ones as [`WordOutcome::Discarded`].
    fn finish_buffer(&mut self) -> Vec<WordOutcome>;

    /// Clears all accumulated state.
    fn reset(&mut self);

    /// Number of hit words decoded in the losing timestamp format.
    fn format_errors(&self) -> u64 {
        0
    }
}

/// Decoder selected at configuration time.
#[derive(Debug, Clone)]
pub enum ReadoutDecoder {
    /// Multiplexed readout.
    Datamux(DatamuxDecoder),
    /// Non-multiplexed readout.
    Nomux(NomuxDecoder),
    /// Triggered readout.
    Triggered(TriggeredDecoder),
}

impl ReadoutDecoder {
    /// Builds the decoder for the configured readout mode.
    #[must_use]
    pub fn from_config(config: &DecoderConfig) -> Self {
        match config.mode {
            ReadoutMode::Datamux => ReadoutDecoder::Datamux(DatamuxDecoder::new(
                config.udp_bug,
                config.offsets.clone(),
            )),
            ReadoutMode::Nomux => {
                ReadoutDecoder::Nomux(NomuxDecoder::new(config.udp_bug, config.offsets.clone()))
            }
            ReadoutMode::Triggered => ReadoutDecoder::Triggered(TriggeredDecoder::new(
                config.udp_bug,
                config.offsets.clone(),
                config.ts_format,
            )),
        }
    }

    fn inner(&self) -> &dyn WordDecoder {
        match self {
            ReadoutDecoder::Datamux(d) => d,
            ReadoutDecoder::Nomux(d) => d,
            ReadoutDecoder::Triggered(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn WordDecoder {
        match self {
            ReadoutDecoder::Datamux(d) => d,
            ReadoutDecoder::Nomux(d) => d,
            ReadoutDecoder::Triggered(d) => d,
        }
    }
}

impl WordDecoder for ReadoutDecoder {
    fn mode(&self) -> ReadoutMode {
        self.inner().mode()
    }

    fn decode_word(&mut self, word: &Word, package_id: i32) -> WordOutcome {
        self.inner_mut().decode_word(word, package_id)
    }

    fn align(
        &mut self,
        window: &[u8; WINDOW_SIZE],
        start: usize,
        lookahead: Lookahead,
    ) -> Option<usize> {
        self.inner_mut().align(window, start, lookahead)
    }

    fn finish_buffer(&mut self) -> Vec<WordOutcome> {
        self.inner_mut().finish_buffer()
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn format_errors(&self) -> u64 {
        self.inner().format_errors()
    }
}
