//! Variable-length integer encoding utilities.
//!
//! 7 bits per byte with a continuation bit, least significant group first.
//! Used for string length prefixes in the metadata codec and for the
//! delta-encoded node ids inside postings.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, XmldexError};

/// Maximum number of bytes a u64 varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(encoded_len(value));
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a u64 value from the start of `bytes`, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return Err(XmldexError::index("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(XmldexError::index("Incomplete VarInt"))
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(XmldexError::index("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Append `values` to `out` as a count followed by deltas between consecutive values.
///
/// Values must be non-decreasing.
pub fn put_delta_u64s(out: &mut Vec<u8>, values: &[u64]) {
    out.extend_from_slice(&encode_u64(values.len() as u64));

    let mut previous = 0u64;
    for &value in values {
        out.extend_from_slice(&encode_u64(value - previous));
        previous = value;
    }
}

/// Inverse of [`put_delta_u64s`]. Returns the values and the number of bytes consumed.
pub fn take_delta_u64s(bytes: &[u8]) -> Result<(Vec<u64>, usize)> {
    let (count, mut offset) = decode_u64(bytes)?;
    if count > bytes.len() as u64 {
        return Err(XmldexError::index(format!(
            "delta list claims {count} values in {} bytes",
            bytes.len()
        )));
    }

    let mut values = Vec::with_capacity(count as usize);
    let mut previous = 0u64;
    for _ in 0..count {
        let (delta, used) = decode_u64(&bytes[offset..])?;
        offset += used;
        previous = previous
            .checked_add(delta)
            .ok_or_else(|| XmldexError::index("delta list overflow"))?;
        values.push(previous);
    }

    Ok((values, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len(value));
        }
    }

    #[test]
    fn test_write_read_u64() {
        let mut buffer = Vec::new();
        let value = 123456789012345u64;

        let bytes_written = write_u64(&mut buffer, value).unwrap();
        assert_eq!(bytes_written, buffer.len());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u64(&mut cursor).unwrap(), value);
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u64(0).len(), 1);
        assert_eq!(encode_u64(127).len(), 1);
        assert_eq!(encode_u64(128).len(), 2);
        assert_eq!(encode_u64(16384).len(), 3);
        assert_eq!(encode_u64(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80]).is_err());
        assert!(read_u64(&mut Cursor::new(vec![0x80u8])).is_err());
    }

    #[test]
    fn test_delta_list_keeps_duplicates() {
        let mut out = Vec::new();
        put_delta_u64s(&mut out, &[3, 3, 10, 4096]);
        out.push(0xAA);

        let (values, used) = take_delta_u64s(&out).unwrap();
        assert_eq!(values, vec![3, 3, 10, 4096]);
        assert_eq!(out[used], 0xAA);
    }

    #[test]
    fn test_delta_list_rejects_bogus_count() {
        let out = encode_u64(1_000);
        assert!(take_delta_u64s(&out).is_err());
    }
}
