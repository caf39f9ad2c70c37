//! # Wire-Level Bit Codec
//!
//! The primitive encodings shared by every part of the bref4 container:
//! big-endian fixed-width integers, length-prefixed UTF-8 strings, the
//! variable-length "restricted int", and bit-packed index arrays.
//!
//! All multi-byte integer fields are big-endian. The packed-array body is
//! the one exception: bits are packed LSB-first into 64-bit words and the
//! words are serialized little-endian, with the final word truncated to
//! whole bytes when that saves space.

use std::io::{Read, Write};

use crate::data::ints::{bits_per_value, IndexArray};
use crate::error::{Bref4Error, Result};

/// Exclusive upper bound of non-negative restricted-int values.
///
/// Keeping the top six bits of a four-byte encoding below `0x3f` guarantees
/// that no encoding starts with the `0xFF` sentinel byte.
pub const MAX_RESTRICTED_INT: i32 = 0x3f00_0000; // 2^30 - 2^24

/// First byte of a restricted int encoding -1; also the record tag for
/// sparse allele-coded records.
pub const SENTINEL_BYTE: u8 = 0xff;

// ---------------------------------------------------------------------------
// fixed-width big-endian integers
// ---------------------------------------------------------------------------

pub fn write_i32<W: Write>(out: &mut W, value: i32) -> Result<()> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_u32<W: Write>(out: &mut W, value: u32) -> Result<()> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_i64<W: Write>(out: &mut W, value: i64) -> Result<()> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn read_i64<R: Read>(input: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub fn read_u8<R: Read>(input: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

// ---------------------------------------------------------------------------
// restricted int
// ---------------------------------------------------------------------------

/// Write an integer in `{-1} ∪ [0, 2^30 - 2^24)` using 1 to 4 bytes.
///
/// `-1` is the single byte `0xFF`. Otherwise the top two bits of the first
/// byte store the count of additional bytes, the low six bits store the
/// high six bits of the value, and the additional bytes follow big-endian.
pub fn write_restricted_int<W: Write>(out: &mut W, value: i32) -> Result<()> {
    if value == -1 {
        out.write_all(&[SENTINEL_BYTE])?;
        return Ok(());
    }
    if !(0..MAX_RESTRICTED_INT).contains(&value) {
        return Err(Bref4Error::BadEncoding {
            value: value as i64,
        });
    }
    let v = value as u32;
    if v >= 1 << 22 {
        let tagged = v | (0b11 << 30);
        out.write_all(&[
            (tagged >> 24) as u8,
            (tagged >> 16) as u8,
            (tagged >> 8) as u8,
            tagged as u8,
        ])?;
    } else if v >= 1 << 14 {
        let tagged = v | (0b10 << 22);
        out.write_all(&[(tagged >> 16) as u8, (tagged >> 8) as u8, tagged as u8])?;
    } else if v >= 1 << 6 {
        let tagged = v | (0b01 << 14);
        out.write_all(&[(tagged >> 8) as u8, tagged as u8])?;
    } else {
        out.write_all(&[v as u8])?;
    }
    Ok(())
}

/// Read an integer written with [`write_restricted_int`].
pub fn read_restricted_int<R: Read>(input: &mut R) -> Result<i32> {
    let first = read_u8(input)?;
    if first == SENTINEL_BYTE {
        return Ok(-1);
    }
    let n_additional = first >> 6;
    let mut value = (first & 0x3f) as u32;
    for _ in 0..n_additional {
        value = (value << 8) | read_u8(input)? as u32;
    }
    Ok(value as i32)
}

// ---------------------------------------------------------------------------
// strings and string arrays
// ---------------------------------------------------------------------------

/// Write a string as a 2-byte big-endian byte length followed by UTF-8 bytes.
pub fn write_utf<W: Write>(out: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(Bref4Error::invalid_data(format!(
            "string of {} bytes exceeds the 65535-byte limit",
            bytes.len()
        )));
    }
    out.write_all(&(bytes.len() as u16).to_be_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

/// Read a string written with [`write_utf`].
pub fn read_utf<R: Read>(input: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 2];
    input.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Bref4Error::corrupt("invalid UTF-8 string"))
}

/// Write a string array as a 4-byte length followed by its elements.
pub fn write_string_array<W: Write>(out: &mut W, strings: &[impl AsRef<str>]) -> Result<()> {
    write_i32(out, strings.len() as i32)?;
    for s in strings {
        write_utf(out, s.as_ref())?;
    }
    Ok(())
}

/// Read a string array written with [`write_string_array`].
pub fn read_string_array<R: Read>(input: &mut R) -> Result<Vec<String>> {
    let len = read_i32(input)?;
    if len < 0 {
        return Err(Bref4Error::corrupt(format!(
            "negative string array length: {}",
            len
        )));
    }
    let mut strings = Vec::with_capacity(len as usize);
    for _ in 0..len {
        strings.push(read_utf(input)?);
    }
    Ok(strings)
}

// ---------------------------------------------------------------------------
// packed index arrays
// ---------------------------------------------------------------------------

/// Write an index array as a restricted-int value size followed by its
/// packed words.
///
/// Full 64-bit words are written little-endian. When the bit count leaves a
/// final partial word of `1..=56` bits, only the bytes covering those bits
/// are written; a leftover of 0 or more than 56 bits writes the full word.
pub fn write_packed_array<W: Write>(out: &mut W, ia: &IndexArray) -> Result<()> {
    write_restricted_int(out, ia.value_size() as i32)?;
    let n_bits = ia.size() as u64 * ia.bits() as u64;
    let words = ia.words();
    let leftover = (n_bits & 63) as u32;
    if leftover == 0 || leftover > 56 {
        for &word in words {
            out.write_all(&word.to_le_bytes())?;
        }
    } else {
        let (last, full) = words.split_last().unwrap_or((&0, &[]));
        for &word in full {
            out.write_all(&word.to_le_bytes())?;
        }
        let n_bytes = leftover.div_ceil(8) as usize;
        out.write_all(&last.to_le_bytes()[..n_bytes])?;
    }
    Ok(())
}

/// Read an index array of `size` elements written with
/// [`write_packed_array`]. Every element is validated against the decoded
/// value size.
pub fn read_packed_array<R: Read>(input: &mut R, size: usize) -> Result<IndexArray> {
    if size == 0 {
        return Err(Bref4Error::corrupt("packed array of length 0"));
    }
    let value_size = read_restricted_int(input)?;
    if value_size <= 0 {
        return Err(Bref4Error::corrupt(format!(
            "invalid packed array value size: {}",
            value_size
        )));
    }
    let value_size = value_size as u32;
    let bits = bits_per_value(value_size);
    let n_bits = size as u64 * bits as u64;
    let n_words = n_bits.div_ceil(64) as usize;
    let mut words = vec![0u64; n_words];
    let leftover = (n_bits & 63) as u32;
    if leftover == 0 || leftover > 56 {
        for word in words.iter_mut() {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            *word = u64::from_le_bytes(buf);
        }
    } else {
        let last_index = n_words - 1;
        for word in words[..last_index].iter_mut() {
            let mut buf = [0u8; 8];
            input.read_exact(&mut buf)?;
            *word = u64::from_le_bytes(buf);
        }
        let n_bytes = leftover.div_ceil(8) as usize;
        let mut buf = [0u8; 8];
        input.read_exact(&mut buf[..n_bytes])?;
        words[last_index] = u64::from_le_bytes(buf);
    }
    let ia = IndexArray::from_words(words, size, value_size);
    for i in 0..size {
        if ia.get(i) >= value_size {
            return Err(Bref4Error::corrupt(format!(
                "packed value {} out of range [0, {})",
                ia.get(i),
                value_size
            )));
        }
    }
    Ok(ia)
}
