//! Low-level utilities shared by the rest of the AXP 21264 emulator:
//! a CRC-32C implementation, big-endian access helpers, ASCII/UTF-16
//! conversion, and offset-addressed storage.

pub mod ascii;
pub mod crc32c;
pub mod endian;
pub mod offset_io;

pub use ascii::{ascii_to_utf16, utf16_to_ascii, ConvertError};
pub use crc32c::{crc32c, crc32c_update};
pub use endian::{
    sext_byte, sext_long, sext_word, zext_byte, zext_long, zext_word, AccessSize, BE_BYTE_MASK,
    BE_LONG_MASK, BE_QUAD_MASK, BE_WORD_MASK,
};
pub use offset_io::{Backing, MemBacking};
