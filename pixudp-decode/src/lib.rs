//! pixudp-decode: word framing, resynchronization and hit decoders.
//!
//! This crate turns raw UDP readout buffers of an HV-CMOS pixel telescope
//! into [`Hit`] records.
//!
//! # Key Components
//!
//! - [`PackageDecoder`] - Frame scanner: header words, empty words, the
//!   runaway guard and the alignment window
//! - [`DatamuxDecoder`], [`NomuxDecoder`], [`TriggeredDecoder`] - One
//!   decoder per readout mode behind the [`WordDecoder`] trait
//! - [`NibbleAligner`], [`TriggeredAligner`] - Byte resynchronization for
//!   streams hit by the byte duplication bug
//! - [`DecoderConfig`] - Builder and JSON configuration
//!
//! # Example
//!
//! ```
//! use pixudp_decode::{DecoderConfig, PackageDecoder, ReadoutMode};
//!
//! let config = DecoderConfig::new()
//!     .with_mode(ReadoutMode::Datamux)
//!     .with_udp_bug(false);
//! let mut decoder = PackageDecoder::from_config(&config);
//!
//! let buffer = [
//!     0x11, 0, 0, 0, 0, 0x05, 0x00, 0x02, // trigger
//!     0x12, 0, 0, 0, 0, 0x10, 0x60, 0x00, // timing and column
//!     0x13, 0x00, 0x70, 0, 0, 0, 0x04, 0x01, // row and timestamp
//! ];
//! let hits = decoder.decode_buffer(&buffer);
//! assert_eq!(hits.len(), 1);
//! assert_eq!((hits[0].column, hits[0].row), (35, 73));
//! ```

pub mod align;
pub mod datamux;
pub mod decoder;
mod error;
pub mod nomux;
pub mod scanner;
pub mod triggered;
pub mod word;

pub use align::{Lookahead, NibbleAligner, TriggeredAligner};
pub use datamux::DatamuxDecoder;
pub use decoder::{ReadoutDecoder, ReadoutMode, WordDecoder, WordOutcome};
pub use error::{Error, Result};
pub use nomux::NomuxDecoder;
pub use scanner::{DecodeStats, PackageDecoder, MAX_FAILED_WORDS};
pub use triggered::{TriggeredDecoder, TsFormat};

// Re-export core types for convenience
pub use pixudp_core::{ChannelOffsets, Hit, TimestampOffset};

use log::warn;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Size of one UDP package.
pub const PACKAGE_SIZE: usize = 1024;
/// Size of one UDP package including the margin for duplicated bytes.
pub const PACKAGE_SIZE_WITH_MARGIN: usize = 1280;

/// JSON root for decoder configuration.
#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonConfig {
    readout: JsonReadout,
    offsets: Vec<JsonOffset>,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonReadout {
    mode: ReadoutMode,
    udp_bug: bool,
    ts_format: Option<u8>,
}

impl Default for JsonReadout {
    fn default() -> Self {
        Self {
            mode: ReadoutMode::Datamux,
            udp_bug: true,
            ts_format: None,
        }
    }
}

#[derive(Deserialize)]
struct JsonOffset {
    layer: i64,
    #[serde(default)]
    ts: i64,
    #[serde(default)]
    ts2: i64,
}

/// Decoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Readout mode of the front-end.
    pub mode: ReadoutMode,
    /// Whether the byte duplication workaround is active.
    pub udp_bug: bool,
    /// Forced pixel word format (triggered readout only).
    pub ts_format: Option<TsFormat>,
    /// Timestamp offsets per channel.
    pub offsets: ChannelOffsets,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            mode: ReadoutMode::Datamux,
            udp_bug: true,
            ts_format: None,
            offsets: ChannelOffsets::new(),
        }
    }
}

impl DecoderConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the readout mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ReadoutMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables or disables the byte duplication workaround.
    #[must_use]
    pub fn with_udp_bug(mut self, udp_bug: bool) -> Self {
        self.udp_bug = udp_bug;
        self
    }

    /// Forces the triggered pixel word format.
    #[must_use]
    pub fn with_ts_format(mut self, ts_format: Option<TsFormat>) -> Self {
        self.ts_format = ts_format;
        self
    }

    /// Sets the timestamp offsets of one layer (1-4).
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is out of range.
    pub fn with_offset(mut self, layer: i64, offset: TimestampOffset) -> Result<Self> {
        self.offsets.set_layer(layer, offset)?;
        Ok(self)
    }

    /// Buffer size of one package as written by the readout.
    #[must_use]
    pub fn package_size(&self) -> usize {
        if self.udp_bug {
            PACKAGE_SIZE_WITH_MARGIN
        } else {
            PACKAGE_SIZE
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// names an invalid layer or timestamp format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid JSON or names an invalid
    /// layer or timestamp format.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let readout = config.readout;

        let ts_format = readout.ts_format.map(TsFormat::try_from).transpose()?;
        if ts_format.is_some() && readout.mode != ReadoutMode::Triggered {
            warn!(
                "ts_format only applies to triggered readout, ignored for {}",
                readout.mode
            );
        }

        let mut offsets = ChannelOffsets::new();
        for offset in config.offsets {
            offsets.set_layer(offset.layer, TimestampOffset::new(offset.ts, offset.ts2))?;
        }

        Ok(Self {
            mode: readout.mode,
            udp_bug: readout.udp_bug,
            ts_format,
            offsets,
        })
    }
}
