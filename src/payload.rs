//! Parameter value decoding (SPEC_FULL.md §4.10).
//!
//! The teacher never needs this: `coreclr-tracing/src/coreclr/events.rs`
//! hard-codes a destination struct per CoreCLR event ID and reads straight
//! into it. This format has to support *any* provider, so the payload is
//! walked generically against the `TypeSignature` tree `metadata.rs` already
//! parsed out of the `MetadataBlock`.

use uuid::Uuid;

use crate::error::Result;
use crate::metadata::{Field, TypeSignature};
use crate::reader::StreamReader;
use std::io::{Read, Seek};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Char16(u16),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Decimal([u8; 16]),
    DateTime(i64),
    Guid(Uuid),
    String(String),
    Array(Vec<FieldValue>),
    Struct(Vec<(String, FieldValue)>),
}

/// Decodes one event's raw payload bytes against its metadata's parameter
/// schema, producing one named value per top-level field.
///
/// Fields with a known static `offset` are *not* fast-pathed by seeking
/// directly to that offset here: the decoder always walks sequentially, so
/// the offset recorded in `Field` exists for callers that want random access
/// into an already-buffered payload rather than for this walker (see
/// SPEC_FULL.md §4.10).
pub fn decode_payload<R: Read + Seek>(
    reader: &mut StreamReader<R>,
    fields: &[Field],
) -> Result<Vec<(String, FieldValue)>> {
    fields
        .iter()
        .map(|field| Ok((field.name.clone(), decode_value(reader, &field.type_signature)?)))
        .collect()
}

fn decode_value<R: Read + Seek>(
    reader: &mut StreamReader<R>,
    type_signature: &TypeSignature,
) -> Result<FieldValue> {
    use TypeSignature::*;
    Ok(match type_signature {
        Boolean => FieldValue::Boolean(reader.read_u8()? != 0),
        Char16 => FieldValue::Char16(reader.read_i16()? as u16),
        SByte => FieldValue::SByte(reader.read_u8()? as i8),
        Byte => FieldValue::Byte(reader.read_u8()?),
        Int16 => FieldValue::Int16(reader.read_i16()?),
        UInt16 => FieldValue::UInt16(reader.read_i16()? as u16),
        Int32 => FieldValue::Int32(reader.read_i32()?),
        UInt32 => FieldValue::UInt32(reader.read_i32()? as u32),
        Int64 => FieldValue::Int64(reader.read_i64()?),
        UInt64 => FieldValue::UInt64(reader.read_i64()? as u64),
        Single => FieldValue::Single(f32::from_le_bytes(reader.read(4)?.try_into().unwrap())),
        Double => FieldValue::Double(f64::from_le_bytes(reader.read(8)?.try_into().unwrap())),
        Decimal => FieldValue::Decimal(reader.read(16)?.try_into().unwrap()),
        DateTime => FieldValue::DateTime(reader.read_i64()?),
        Guid => FieldValue::Guid(Uuid::from_bytes(reader.read_guid()?)),
        String => FieldValue::String(reader.read_nul_terminated_utf16()?),
        Array(element) => {
            let count = reader.read_u16()? as u32;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(decode_value(reader, element)?);
            }
            FieldValue::Array(values)
        }
        Struct(nested_fields) => {
            let mut values = Vec::with_capacity(nested_fields.len());
            for nested in nested_fields {
                values.push((nested.name.clone(), decode_value(reader, &nested.type_signature)?));
            }
            FieldValue::Struct(values)
        }
    })
}
