//! Reflected-binary (Gray) code conversion.
//!
//! The front-end stores some of its counters Gray encoded so that only one bit
//! flips per clock tick. The decoders convert them back before use.

/// Decodes a `bits`-wide Gray encoded value into ordinary binary.
///
/// The most significant bit is copied, every lower bit is the XOR of its Gray
/// bit with the already decoded bit above it. Bits above `bits` are ignored.
#[inline]
#[must_use]
pub fn gray_decode(gray: u32, bits: u32) -> u32 {
    if bits == 0 {
        return 0;
    }
    let mut binary = gray & (1 << (bits - 1));
    for i in (0..bits - 1).rev() {
        binary |= (gray ^ (binary >> 1)) & (1 << i);
    }
    binary
}

/// Encodes a `bits`-wide binary value into Gray code.
#[inline]
#[must_use]
pub fn gray_encode(value: u32, bits: u32) -> u32 {
    let mask = if bits >= 32 { u32::MAX } else { (1 << bits) - 1 };
    (value ^ (value >> 1)) & mask
}
