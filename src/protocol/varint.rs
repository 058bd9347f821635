use bytes::BufMut;

use crate::error::DecodingError;

// https://kafka.apache.org/documentation/#record
// Signed integers are zigzag mapped, then written 7 bits per byte, least significant group
// first, with the high bit set on every byte except the last.

pub const MAX_VARINT_LEN: usize = 5;
pub const MAX_VARLONG_LEN: usize = 10;

pub fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn unzigzag32(u: u32) -> i32 {
    ((u >> 1) as i32) ^ -((u & 1) as i32)
}

pub fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn unzigzag64(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

pub fn put_uvarint(dst: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn varint_len(n: i32) -> usize {
    uvarint_len(zigzag32(n) as u64)
}

pub fn varlong_len(n: i64) -> usize {
    uvarint_len(zigzag64(n))
}

/// Reads an unsigned varint holding at most `bits` significant bits from the front of `src`.
/// Returns the value and the number of bytes it occupied.
pub fn read_uvarint(src: &[u8], bits: u32) -> Result<(u64, usize), DecodingError> {
    let max_len = (bits as usize + 6) / 7;
    let mut value = 0u64;

    for i in 0..max_len {
        let Some(&byte) = src.get(i) else {
            return Err(DecodingError::InsufficientData {
                needed: i + 1,
                remaining: src.len(),
            });
        };
        let chunk = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;
        // the final group may only carry the bits left over in the target width
        if i == max_len - 1 && chunk >> (bits - shift) != 0 {
            return Err(DecodingError::VarintOverflow(max_len));
        }
        value |= chunk << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(DecodingError::VarintOverflow(max_len))
}

pub fn read_varint(src: &[u8]) -> Result<(i32, usize), DecodingError> {
    let (raw, len) = read_uvarint(src, 32)?;
    Ok((unzigzag32(raw as u32), len))
}

pub fn read_varlong(src: &[u8]) -> Result<(i64, usize), DecodingError> {
    let (raw, len) = read_uvarint(src, 64)?;
    Ok((unzigzag64(raw), len))
}
