//! pixudp-core: Core types for pixel detector UDP readout decoding.
//!
//! This crate provides the hit record produced by the decoders, the
//! completion flags used while a hit is assembled, Gray code conversion
//! and the per-channel timestamp offset correction.
//!

pub mod completion;
pub mod error;
pub mod gray;
pub mod hit;
pub mod offset;

pub use completion::Completion;
pub use error::{Error, Result};
pub use gray::{gray_decode, gray_encode};
pub use hit::{remap_row, sort_hits, Hit};
pub use offset::{ChannelOffsets, TimestampOffset, MAX_CHANNELS};
