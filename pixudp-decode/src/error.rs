//! Decoder error types.

use thiserror::Error;

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoder error types.
///
/// Decoding a buffer never fails; these cover setting a decoder up.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed JSON configuration.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] pixudp_core::Error),
}
