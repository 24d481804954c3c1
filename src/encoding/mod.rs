//! # Encoding Module
//!
//! Integer encodings used inside compact tree pages.
//!
//! - **Varint encoding**: zig-zag mapped LEB128 for entry values

pub mod varint;

pub use varint::{decode_value, decode_varint, encode_value, encode_varint, value_len, varint_len};
