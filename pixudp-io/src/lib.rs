//! pixudp-io: capture file reading and hit list output for pixudp.
//!
//! Captures are memory-mapped via memmap2 and decoded package by package.
//! Several captures can be decoded in parallel with [`decode_files`].
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    decode_files, CaptureFileReader, DecodedCapture, HitListReader, MappedFileReader,
};
pub use writer::{format_header, layer_path, HitListWriter, SplitHitWriter};
