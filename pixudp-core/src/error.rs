//! Error types for pixudp-core.

use thiserror::Error;

/// Result type alias for pixudp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for pixudp operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Channel index outside the supported channel range.
    #[error("invalid channel index {index} (supported: 0..{max})")]
    InvalidChannel { index: usize, max: usize },

    /// Layer number outside the telescope layer range.
    #[error("invalid layer {0} (expected 1..=4)")]
    InvalidLayer(i64),

    /// Unknown triggered-readout timestamp format.
    #[error("invalid timestamp format {0} (expected 1 or 2)")]
    InvalidTsFormat(u8),
}
