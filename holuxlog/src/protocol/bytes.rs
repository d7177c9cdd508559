//! Little-endian field access and hex helpers for log dumps.
//!
//! All readers are bounds-checked and return `None` past the end of the
//! buffer instead of panicking; the log parser treats that as a decode
//! failure for the current sector.

use crate::error::Result;
use byteorder::{ByteOrder, LittleEndian};

/// Borrow `len` bytes at `offset`, if present.
pub fn slice_at(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    buf.get(offset..offset.checked_add(len)?)
}

/// Read a byte.
pub fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Read a little-endian `u16`.
pub fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    slice_at(buf, offset, 2).map(LittleEndian::read_u16)
}

/// Read a little-endian `i16`.
pub fn read_i16(buf: &[u8], offset: usize) -> Option<i16> {
    slice_at(buf, offset, 2).map(LittleEndian::read_i16)
}

/// Read a little-endian `u32`.
pub fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    slice_at(buf, offset, 4).map(LittleEndian::read_u32)
}

/// Read a little-endian `f32`.
pub fn read_f32(buf: &[u8], offset: usize) -> Option<f32> {
    slice_at(buf, offset, 4).map(LittleEndian::read_f32)
}

/// Read a little-endian `f64`.
pub fn read_f64(buf: &[u8], offset: usize) -> Option<f64> {
    slice_at(buf, offset, 8).map(LittleEndian::read_f64)
}

/// Concatenate byte slices into one buffer.
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Decode a hex string (either case) into bytes.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(s.trim())?)
}

/// Encode bytes as uppercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Whether `len` bytes at `offset` exist and are all `value`.
pub fn is_filled_with(buf: &[u8], offset: usize, len: usize, value: u8) -> bool {
    slice_at(buf, offset, len).is_some_and(|s| s.iter().all(|&b| b == value))
}

/// Whether `pattern` occurs at `offset`.
pub fn matches_at(buf: &[u8], offset: usize, pattern: &[u8]) -> bool {
    slice_at(buf, offset, pattern.len()) == Some(pattern)
}
