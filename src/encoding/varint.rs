//! # Zig-Zag Variable-Length Integer Encoding
//!
//! Entry values in compact tree pages are stored as zig-zag mapped LEB128
//! varints. Leaf values are caller integers, branch values are child page
//! numbers; both are small in the common case and take one or two bytes.
//!
//! ## Encoding Format
//!
//! The signed value is first zig-zag mapped so that small magnitudes of
//! either sign become small unsigned numbers:
//!
//! | Signed | Zig-zag |
//! |--------|---------|
//! | 0      | 0       |
//! | -1     | 1       |
//! | 1      | 2       |
//! | -2     | 3       |
//! | 2      | 4       |
//!
//! The unsigned result is written 7 bits at a time, least significant group
//! first, with the high bit of each byte set when more bytes follow:
//!
//! | Zig-zag Range            | Bytes |
//! |--------------------------|-------|
//! | 0 - 127                  | 1     |
//! | 128 - 16383              | 2     |
//! | 16384 - 2097151          | 3     |
//! | ...                      | ...   |
//! | 2^63 - u64::MAX          | 10    |
//!
//! ## Self-Check
//!
//! Decoding rejects input that a well-formed page can never contain:
//!
//! - Truncated encodings (continuation bit set on the last available byte)
//! - Encodings longer than 10 bytes or overflowing 64 bits
//! - Non-canonical encodings (a trailing zero group)
//! - Negative entry values (`decode_value` only; values are never negative)
//!
//! A failed self-check means the page is corrupt; callers propagate it.
//!
//! ## Usage Example
//!
//! ```rust
//! use compact_tree::encoding::varint::{decode_value, encode_value, value_len};
//!
//! let mut buf = [0u8; 10];
//! let written = encode_value(300, &mut buf);
//! assert_eq!(written, value_len(300));
//!
//! let (value, read) = decode_value(&buf).unwrap();
//! assert_eq!(value, 300);
//! assert_eq!(read, written);
//! ```
//!
//! No heap allocations are performed by any function in this module.

use eyre::{bail, ensure, Result};

/// Longest LEB128 encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Writes `value` into `buf` and returns the number of bytes written.
///
/// `buf` must hold at least `varint_len(value)` bytes.
pub fn encode_varint(mut value: u64, buf: &mut [u8]) -> usize {
    let mut written = 0;
    while value >= 0x80 {
        buf[written] = (value as u8) | 0x80;
        value >>= 7;
        written += 1;
    }
    buf[written] = value as u8;
    written + 1
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            bail!("varint overflows 64 bits");
        }
        value |= group << (7 * i);
        if byte & 0x80 == 0 {
            ensure!(
                i == 0 || byte != 0,
                "non-canonical {}-byte varint",
                i + 1
            );
            return Ok((value, i + 1));
        }
    }

    if buf.len() < MAX_VARINT_LEN {
        bail!("truncated varint ({} bytes available)", buf.len())
    }
    bail!("varint longer than {} bytes", MAX_VARINT_LEN)
}

/// Encoded size of an entry value.
#[inline]
pub fn value_len(value: i64) -> usize {
    varint_len(zigzag_encode(value))
}

pub fn encode_value(value: i64, buf: &mut [u8]) -> usize {
    encode_varint(zigzag_encode(value), buf)
}

/// Decodes an entry value, rejecting anything a page could not have stored.
pub fn decode_value(buf: &[u8]) -> Result<(i64, usize)> {
    let (raw, read) = decode_varint(buf)?;
    let value = zigzag_decode(raw);
    ensure!(value >= 0, "corrupt entry value: decoded {} is negative", value);
    Ok((value, read))
}
