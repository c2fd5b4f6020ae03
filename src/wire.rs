//! Declarative wire structs, decoded with `binrw` exactly as the teacher's
//! `coreclr-tracing/src/nettrace/mod.rs` does for the parts of the format
//! that don't need delta/compression state (spec §3, §4.2, §4.3, §4.7, §6).
//!
//! Fields that depend on runtime state (the previous event's header, the
//! active file format version) are **not** modeled here — they're decoded by
//! hand in `event_header.rs` and `decoder.rs`, the same split the teacher
//! makes between its derived `EventBlobHeader` and its manually written
//! `parse_compressed_header`.

use binrw::{BinRead, NullWideString};

/// A `u32`-length-prefixed UTF-8 string, used for the serialization preamble
/// and for object type names (`"Trace"`, `"EventBlock"`, ...).
#[derive(BinRead, Clone)]
#[br(little)]
pub struct LengthPrefixedString {
    length: u32,
    #[br(count = length)]
    bytes: Vec<u8>,
}

impl LengthPrefixedString {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl std::fmt::Debug for LengthPrefixedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Tags that precede every serialized "FastSerialization" object.
#[derive(BinRead, Debug, Eq, PartialEq, Clone, Copy)]
#[br(repr(u8))]
pub enum ObjectTag {
    Invalid = 0,
    NullReference = 1,
    BeginPrivateObject = 5,
    EndObject = 6,
}

/// Every object opens with a type object; its `version` tells us which
/// revision of that object's layout follows.
#[derive(BinRead, Debug)]
#[br(little, magic = b"\x05\x01")]
pub struct TypeObject {
    pub version: u32,
    pub minimum_reader_version: u32,
    pub type_name: LengthPrefixedString,
    pub end_tag: ObjectTag,
}

#[derive(BinRead, Debug, Clone, Copy)]
#[br(little)]
pub struct WallClockTime {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

/// The `Trace` entry object (spec §4.2). `version` (from the preceding
/// `TypeObject`) is `binrw`-imported rather than read from the stream; fields
/// introduced in V3+ are conditional on it, and V1/V2 defaults (pointerSize=8,
/// processId=0, processorCount=1) are filled in via `#[br(calc = ...)]`.
#[derive(BinRead, Debug, Clone, Copy)]
#[br(little, import { version: u32 })]
pub struct TraceObject {
    pub sync_time_utc: WallClockTime,
    pub sync_time_qpc: u64,
    pub qpc_frequency: u64,

    #[br(if(version >= 3))]
    pointer_size_v3: Option<u32>,
    #[br(if(version >= 3))]
    process_id_v3: Option<u32>,
    #[br(if(version >= 3))]
    number_of_processors_v3: Option<u32>,
    #[br(if(version >= 3))]
    expected_cpu_sampling_rate_v3: Option<u32>,

    #[br(calc = pointer_size_v3.unwrap_or(8))]
    pub pointer_size: u32,
    #[br(calc = process_id_v3.unwrap_or(0))]
    pub process_id: u32,
    #[br(calc = number_of_processors_v3.unwrap_or(1))]
    pub number_of_processors: u32,
    #[br(calc = expected_cpu_sampling_rate_v3.unwrap_or(0))]
    pub expected_cpu_sampling_rate: u32,
}

/// Shared `headerSize`/`flags`/min-max-timestamp prefix for `EventBlock` and
/// `MetadataBlock` (spec §6). `headerSize` is a count of bytes following
/// itself and `flags`, so the remaining skip to content start is computed by
/// the caller, not here (binrw can't see the enclosing block's total size).
#[derive(BinRead, Debug, Clone, Copy)]
#[br(little)]
pub struct BlockHeaderPrefix {
    pub header_size: i16,
    pub flags: i16,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub struct StackEntryRaw {
    pub length: u32,
    #[br(count = length)]
    pub bytes: Vec<u8>,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub struct StackBlockBody {
    pub first_id: u32,
    pub count: u32,
    #[br(count = count)]
    pub stacks: Vec<StackEntryRaw>,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub struct ThreadSequenceNumber {
    pub capture_thread_id: i64,
    pub sequence_number: i32,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub struct SequencePointBlockBody {
    pub timestamp: i64,
    pub thread_count: i32,
    #[br(count = thread_count)]
    pub thread_sequence_numbers: Vec<ThreadSequenceNumber>,
}

/// Wire type codes for parameter schema fields (spec §4.5).
#[derive(BinRead, Debug, PartialEq, Eq, Clone, Copy)]
#[br(little, repr = u32)]
pub enum WireTypeCode {
    Struct = 1,
    Boolean = 3,
    Char16 = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    Guid = 17,
    String = 18,
    Array = 19,
}

/// One `{ name: NUL-terminated UTF-16, typeSignature }` schema field, used
/// directly for layout V1 and nested inside a V2 entry after skipping its
/// length prefix (handled in `metadata.rs`, since the recursive struct case
/// needs a hand-rolled loop binrw's derive can't express generically).
#[derive(BinRead, Debug)]
#[br(little)]
pub struct FieldNameAndType {
    pub name: NullWideString,
    pub type_code: WireTypeCode,
}
