//! Top-level stream header: the optional `"Nettrace"` magic, the
//! FastSerialization preamble string, and the `Trace` entry object
//! (spec §4.2, §6).
//!
//! Mirrors how the teacher's `EventPipeParser::new` (`parser.rs`) reads the
//! header before entering its main loop, generalized to the magic-optional
//! case V1/V2 streams allow and to converting the wall-clock time into a
//! real `chrono` timestamp rather than leaving it as raw wire fields.

use binrw::BinRead;
use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::error::{DecodeError, Result};
use crate::reader::StreamReader;
use crate::wire::{ObjectTag, TraceObject, TypeObject, WallClockTime};
use std::io::{Read, Seek};

const NETTRACE_MAGIC: &[u8; 8] = b"Nettrace";
const SERIALIZATION_PREAMBLE: &str = "!FastSerialization.1";

#[derive(Debug, Clone)]
pub struct TraceParameters {
    pub file_format_version: u32,
    pub sync_time_utc: DateTime<Utc>,
    pub sync_time_qpc: u64,
    pub qpc_frequency: u64,
    pub pointer_size: u32,
    pub process_id: u32,
    pub number_of_processors: u32,
    pub expected_cpu_sampling_rate: u32,
    /// Absolute offset of the end of the flat, unwrapped event stream.
    /// Present only for V1/V2 (spec.md:79); V3's equivalent flat stream has
    /// no such forward reference and is instead read until end of stream.
    pub end_of_event_stream: Option<u64>,
}

fn wall_clock_to_chrono(t: WallClockTime) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(
        t.year as i32,
        t.month as u32,
        t.day as u32,
        t.hour as u32,
        t.minute as u32,
        t.second as u32,
    )
    .single()
    .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    + chrono::Duration::milliseconds(t.millisecond as i64)
}

/// Reads the optional magic, the serialization preamble, and the `Trace`
/// entry object, returning the parameters everything downstream needs
/// (file format version first and foremost — it selects every other
/// layout decision in `block.rs` and `event_header.rs`).
pub fn read_trace_header<R: Read + Seek>(reader: &mut StreamReader<R>) -> Result<TraceParameters> {
    let peeked = reader.peek(8)?;
    let is_net_trace = peeked.as_slice() == NETTRACE_MAGIC;
    if is_net_trace {
        reader.read(8)?;
        debug!("stream carries the Nettrace magic");
    }

    let offset = reader.position()?.0;
    let preamble_len = reader.read_u32()?;
    let preamble_bytes = reader.read(preamble_len as usize)?;
    let preamble = std::str::from_utf8(&preamble_bytes)
        .map_err(|_| DecodeError::invalid_format(offset, "serialization preamble is not UTF-8"))?;
    if preamble != SERIALIZATION_PREAMBLE {
        return Err(DecodeError::invalid_format(
            offset,
            format!("unexpected serialization preamble {preamble:?}"),
        ));
    }

    let type_offset = reader.position()?.0;
    let type_object = TypeObject::read(reader.get_mut())
        .map_err(|e| wrap_binrw(e, type_offset))?;
    if type_object.type_name.as_str() != "Trace" {
        return Err(DecodeError::invalid_format(
            type_offset,
            format!("entry object is {:?}, expected \"Trace\"", type_object.type_name.as_str()),
        ));
    }

    let begin_tag_offset = reader.position()?.0;
    let begin_tag = ObjectTag::read(reader.get_mut()).map_err(|e| wrap_binrw(e, begin_tag_offset))?;
    if begin_tag != ObjectTag::BeginPrivateObject {
        return Err(DecodeError::invalid_format(
            begin_tag_offset,
            "Trace object missing BeginPrivateObject tag",
        ));
    }
    // the nested type object repeats its own header before the Trace payload
    let _nested_type_offset = reader.position()?.0;
    let _nested_type = TypeObject::read(reader.get_mut()).map_err(|e| wrap_binrw(e, _nested_type_offset))?;

    let version = type_object.version;
    let trace_offset = reader.position()?.0;
    let trace_object = TraceObject::read_args(reader.get_mut(), binrw::args! { version })
        .map_err(|e| wrap_binrw(e, trace_offset))?;

    let end_tag_offset = reader.position()?.0;
    let end_tag = ObjectTag::read(reader.get_mut()).map_err(|e| wrap_binrw(e, end_tag_offset))?;
    if end_tag != ObjectTag::EndObject {
        return Err(DecodeError::invalid_format(end_tag_offset, "Trace object missing EndObject tag"));
    }

    if (version >= 4) != is_net_trace {
        return Err(DecodeError::invalid_format(
            trace_offset,
            format!(
                "fileFormatVersion {version} is inconsistent with Nettrace magic presence ({is_net_trace})"
            ),
        ));
    }

    let end_of_event_stream = if version < 3 {
        Some(reader.read_u64()?)
    } else {
        None
    };

    Ok(TraceParameters {
        file_format_version: version,
        sync_time_utc: wall_clock_to_chrono(trace_object.sync_time_utc),
        sync_time_qpc: trace_object.sync_time_qpc,
        qpc_frequency: trace_object.qpc_frequency,
        pointer_size: trace_object.pointer_size,
        process_id: trace_object.process_id,
        number_of_processors: trace_object.number_of_processors,
        expected_cpu_sampling_rate: trace_object.expected_cpu_sampling_rate,
        end_of_event_stream,
    })
}

fn wrap_binrw(err: binrw::Error, offset: u64) -> DecodeError {
    match err {
        binrw::Error::Io(io) => DecodeError::Io(io),
        other => DecodeError::invalid_format(offset, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_type_object(name: &str, version: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x05\x01");
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(ObjectTag::EndObject as u8);
        bytes
    }

    fn encode_trace_stream(version: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        if version >= 4 {
            bytes.extend_from_slice(NETTRACE_MAGIC);
        }
        bytes.extend_from_slice(&(SERIALIZATION_PREAMBLE.len() as u32).to_le_bytes());
        bytes.extend_from_slice(SERIALIZATION_PREAMBLE.as_bytes());
        bytes.extend_from_slice(&encode_type_object("Trace", version));
        bytes.push(ObjectTag::BeginPrivateObject as u8);
        bytes.extend_from_slice(&encode_type_object("Trace", version));

        // WallClockTime
        for field in [2026u16, 1, 3, 15, 10, 30, 0, 0] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(&1_000_000u64.to_le_bytes()); // sync_time_qpc
        bytes.extend_from_slice(&1_000_000_000u64.to_le_bytes()); // qpc_frequency
        if version >= 3 {
            bytes.extend_from_slice(&8u32.to_le_bytes()); // pointer size
            bytes.extend_from_slice(&4321u32.to_le_bytes()); // process id
            bytes.extend_from_slice(&4u32.to_le_bytes()); // number of processors
            bytes.extend_from_slice(&1000u32.to_le_bytes()); // sampling rate
        }
        bytes.push(ObjectTag::EndObject as u8);
        if version < 3 {
            bytes.extend_from_slice(&0xdead_beefu64.to_le_bytes()); // forward reference
        }
        bytes
    }

    #[test]
    fn reads_v4_trace_header_with_magic() {
        let bytes = encode_trace_stream(4);
        let mut reader = StreamReader::new(Cursor::new(bytes));
        let params = read_trace_header(&mut reader).unwrap();
        assert_eq!(params.file_format_version, 4);
        assert_eq!(params.process_id, 4321);
        assert_eq!(params.qpc_frequency, 1_000_000_000);
        assert_eq!(params.end_of_event_stream, None);
    }

    #[test]
    fn v2_trace_header_uses_defaults_for_v3_fields() {
        let bytes = encode_trace_stream(2);
        let mut reader = StreamReader::new(Cursor::new(bytes));
        let params = read_trace_header(&mut reader).unwrap();
        assert_eq!(params.file_format_version, 2);
        assert_eq!(params.pointer_size, 8);
        assert_eq!(params.process_id, 0);
        assert_eq!(params.number_of_processors, 1);
        assert_eq!(params.end_of_event_stream, Some(0xdead_beef));
    }

    #[test]
    fn version_and_magic_mismatch_is_rejected() {
        // Carries the magic but declares a pre-V4 version.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NETTRACE_MAGIC);
        bytes.extend_from_slice(&encode_trace_stream(2)[0..]);
        let mut reader = StreamReader::new(Cursor::new(bytes));
        assert!(read_trace_header(&mut reader).is_err());
    }
}
