//! Primitive field encoding and decoding.
//!
//! The MySQL protocol uses little-endian fixed-width integers, length-encoded
//! integers (1, 3, 4 or 9 bytes), length-encoded strings and NUL-terminated
//! strings. These helpers operate on any [`Buf`]/[`BufMut`].

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Prefix marking a NULL value in a length-encoded field.
pub const LENENC_NULL: u8 = 0xFB;

fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::UnexpectedEof {
            expected: n,
            actual: src.remaining(),
        });
    }
    Ok(())
}

/// Read one byte.
pub fn read_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read one byte and check that it has the expected value.
pub fn expect_u8(src: &mut impl Buf, expected: u8) -> Result<(), ProtocolError> {
    let actual = read_u8(src)?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedByte { expected, actual });
    }
    Ok(())
}

/// Read a little-endian `u16`.
pub fn read_u16(src: &mut impl Buf) -> Result<u16, ProtocolError> {
    ensure(src, 2)?;
    Ok(src.get_u16_le())
}

/// Read a little-endian 3-byte integer.
pub fn read_u24(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 3)?;
    Ok(src.get_uint_le(3) as u32)
}

/// Read a little-endian `u32`.
pub fn read_u32(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

/// Read a little-endian `u64`.
pub fn read_u64(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_u64_le())
}

/// Read exactly `len` bytes.
pub fn read_bytes(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Skip `len` bytes.
pub fn skip(src: &mut impl Buf, len: usize) -> Result<(), ProtocolError> {
    ensure(src, len)?;
    src.advance(len);
    Ok(())
}

/// Read a length-encoded integer; `None` is the NULL marker (`0xFB`).
pub fn read_lenenc_int(src: &mut impl Buf) -> Result<Option<u64>, ProtocolError> {
    let first = read_u8(src)?;
    match first {
        0x00..=0xFA => Ok(Some(u64::from(first))),
        LENENC_NULL => Ok(None),
        0xFC => read_u16(src).map(|v| Some(u64::from(v))),
        0xFD => read_u24(src).map(|v| Some(u64::from(v))),
        0xFE => read_u64(src).map(Some),
        _ => Err(ProtocolError::InvalidLengthEncoding(first)),
    }
}

/// Read a length-encoded integer that must not be NULL.
pub fn read_lenenc_int_non_null(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    read_lenenc_int(src)?.ok_or(ProtocolError::UnexpectedNull)
}

/// Read a length-encoded byte string; `None` is the NULL marker.
pub fn read_lenenc_bytes(src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
    match read_lenenc_int(src)? {
        None => Ok(None),
        Some(len) => {
            let len = usize::try_from(len).map_err(|_| ProtocolError::LengthOverflow {
                length: usize::MAX,
                max: src.remaining(),
            })?;
            read_bytes(src, len).map(Some)
        }
    }
}

/// Skip a length-encoded byte string.
pub fn skip_lenenc_bytes(src: &mut impl Buf) -> Result<(), ProtocolError> {
    let len = read_lenenc_int(src)?.unwrap_or(0);
    let len = usize::try_from(len).map_err(|_| ProtocolError::LengthOverflow {
        length: usize::MAX,
        max: src.remaining(),
    })?;
    skip(src, len)
}

/// Read a NUL-terminated byte string (the terminator is consumed, not returned).
///
/// Fails if no terminator is found.
pub fn read_null_terminated(src: &mut impl Buf) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = Vec::new();
    while src.has_remaining() {
        let b = src.get_u8();
        if b == 0 {
            return Ok(bytes);
        }
        bytes.push(b);
    }
    Err(ProtocolError::UnexpectedEof {
        expected: 1,
        actual: 0,
    })
}

/// Read a byte string terminated by NUL or by the end of the payload.
pub fn read_null_or_eof_terminated(src: &mut impl Buf) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(src.remaining());
    while src.has_remaining() {
        let b = src.get_u8();
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    bytes
}

/// Number of bytes needed to encode `value` as a length-encoded integer.
#[must_use]
pub const fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 0x1_0000 {
        3
    } else if value < 0x100_0000 {
        4
    } else {
        9
    }
}

/// Write a length-encoded integer.
pub fn write_lenenc_int(dst: &mut impl BufMut, value: u64) {
    if value < 251 {
        dst.put_u8(value as u8);
    } else if value < 0x1_0000 {
        dst.put_u8(0xFC);
        dst.put_u16_le(value as u16);
    } else if value < 0x100_0000 {
        dst.put_u8(0xFD);
        dst.put_uint_le(value, 3);
    } else {
        dst.put_u8(0xFE);
        dst.put_u64_le(value);
    }
}

/// Write a length-encoded byte string.
pub fn write_lenenc_bytes(dst: &mut impl BufMut, bytes: &[u8]) {
    write_lenenc_int(dst, bytes.len() as u64);
    dst.put_slice(bytes);
}

/// Write a NUL-terminated byte string.
pub fn write_null_terminated(dst: &mut impl BufMut, bytes: &[u8]) {
    dst.put_slice(bytes);
    dst.put_u8(0);
}
