//! Word framing of the UDP readout stream.
//!
//! The stream consists of 8-byte words. A header word starts with the magic
//! bytes `80 81 82 83 84 85` and carries the big-endian package id in its
//! last two bytes; every other non-zero word is a data word whose meaning
//! depends on the readout mode.

use std::fmt;

/// Size of one word in bytes.
pub const WORD_SIZE: usize = 8;
/// Size of the alignment window (two consecutive words).
pub const WINDOW_SIZE: usize = 2 * WORD_SIZE;
/// Magic prefix of a header word.
pub const HEADER_MAGIC: [u8; 6] = [0x80, 0x81, 0x82, 0x83, 0x84, 0x85];
/// Byte offset of the last word of a 1024-byte package.
///
/// With the duplication bug active this word is often all zero apart from
/// one trailing duplicated byte.
pub const TRAILING_MARGIN_OFFSET: usize = 1016;

/// One 8-byte word of the stream.
pub type Word = [u8; WORD_SIZE];

/// Classification of a word by the frame scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    /// Header word with the package id of the following data.
    Header {
        /// Big-endian package id.
        package_id: u16,
    },
    /// All-zero word.
    Empty,
    /// Data word for the active decoder.
    Data,
}

impl WordKind {
    /// Classifies a word.
    #[must_use]
    pub fn of(word: &Word) -> Self {
        if let Some(package_id) = package_id(word) {
            WordKind::Header { package_id }
        } else if is_empty(word) {
            WordKind::Empty
        } else {
            WordKind::Data
        }
    }
}

/// Returns the package id if the word is a header word.
#[inline]
#[must_use]
pub fn package_id(word: &Word) -> Option<u16> {
    if word[..HEADER_MAGIC.len()] == HEADER_MAGIC {
        Some(u16::from_be_bytes([word[6], word[7]]))
    } else {
        None
    }
}

/// Returns true if every byte of the slice is zero.
#[inline]
#[must_use]
pub fn is_empty(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Upper four bits of a byte.
#[inline]
#[must_use]
pub fn high_nibble(byte: u8) -> u8 {
    byte >> 4
}

/// Lower four bits of a byte.
#[inline]
#[must_use]
pub fn low_nibble(byte: u8) -> u8 {
    byte & 0x0F
}

/// Assembles a big-endian unsigned field from consecutive bytes.
#[inline]
#[must_use]
pub fn be_field(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .fold(0_i64, |acc, &b| (acc << 8) | i64::from(b))
}

/// Hex dump of a word for log messages.
pub struct HexWord<'a>(pub &'a [u8]);

impl fmt::Display for HexWord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
