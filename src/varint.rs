//! Base-128 little-endian VarUInt encoding used by the V4+ compressed event
//! header (spec §4.4). Grounded on `coreclr-tracing/src/helpers.rs`'s
//! `parse_varint_*` family; extended with the byte-count caps spec §4.4 and §7
//! require (`MalformedVarInt` on continuation overrun) which the teacher's
//! unbounded loop doesn't enforce.

use std::io::Read;

use crate::error::{DecodeError, Result};

const MAX_BYTES_U32: usize = 5;
const MAX_BYTES_U64: usize = 10;

fn read_varint_u64(reader: &mut impl Read, offset: u64, max_bytes: usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for i in 0..max_bytes {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).map_err(|_| DecodeError::Truncated { offset })?;
        let byte = byte[0];
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if i == max_bytes - 1 {
            return Err(DecodeError::MalformedVarInt { offset });
        }
    }
    Err(DecodeError::MalformedVarInt { offset })
}

pub fn read_varint_u32(reader: &mut impl Read, offset: u64) -> Result<u32> {
    read_varint_u64(reader, offset, MAX_BYTES_U32).map(|v| v as u32)
}

pub fn read_varint_u64_full(reader: &mut impl Read, offset: u64) -> Result<u64> {
    read_varint_u64(reader, offset, MAX_BYTES_U64)
}

/// Reads an unsigned varint and reinterprets its bits as signed. Valid for
/// the non-negative deltas this format always emits (sequence numbers and
/// timestamps only ever move forward); see SPEC_FULL.md §9 open question.
pub fn read_varint_i32(reader: &mut impl Read, offset: u64) -> Result<i32> {
    read_varint_u32(reader, offset).map(|v| v as i32)
}

pub fn read_varint_i64(reader: &mut impl Read, offset: u64) -> Result<i64> {
    read_varint_u64_full(reader, offset).map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn single_byte_roundtrip() {
        let mut c = Cursor::new(vec![0x50]);
        assert_eq!(read_varint_u32(&mut c, 0).unwrap(), 0x50);
    }

    #[test]
    fn multi_byte_roundtrip() {
        // 300 = 0b1_0010_1100 -> low7=0x2c|0x80, high=0x02
        let mut c = Cursor::new(vec![0xac, 0x02]);
        assert_eq!(read_varint_u32(&mut c, 0).unwrap(), 300);
    }

    #[test]
    fn overrun_is_malformed() {
        let mut c = Cursor::new(vec![0x80, 0x80, 0x80, 0x80, 0x80]);
        assert!(matches!(
            read_varint_u32(&mut c, 0),
            Err(DecodeError::MalformedVarInt { .. })
        ));
    }

    #[test]
    fn truncated_stream() {
        let mut c = Cursor::new(vec![0x80]);
        assert!(matches!(
            read_varint_u32(&mut c, 0),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
