//! Block framer (spec §4.3): reads the stream of top-level objects that
//! follow the `Trace` header, dispatching each by its type name and
//! stopping at the final `NullReference` tag that marks end of stream.
//!
//! This framing applies to V4+ only. V1-V3 have no block wrappers at all —
//! events are directly concatenated (spec.md:91) — and are decoded instead by
//! `EventPipeDecoder::decode_flat_event_stream` (`decoder.rs`), which never
//! calls into this module.
//!
//! Grounded on `EventPipeParser::advance_to_next_object`
//! (`coreclr-tracing/src/nettrace/parser.rs`), generalized to cover
//! `StackBlock` and `SPBlock` (which the teacher also parses) plus a
//! size-based skip for any block kind the registry doesn't recognize, which
//! the teacher doesn't need because it only ever sees its own trace files.

use log::{debug, warn};

use crate::error::Result;
use crate::reader::StreamReader;
use crate::wire::{ObjectTag, TypeObject};
use std::io::{Read, Seek};
use binrw::BinRead;

#[derive(Debug)]
pub enum BlockKind {
    EventBlock,
    MetadataBlock,
    StackBlock,
    SequencePointBlock,
    Unknown(String),
}

impl BlockKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "EventBlock" => BlockKind::EventBlock,
            "MetadataBlock" => BlockKind::MetadataBlock,
            "StackBlock" => BlockKind::StackBlock,
            "SPBlock" => BlockKind::SequencePointBlock,
            other => BlockKind::Unknown(other.to_string()),
        }
    }
}

/// One object's framing: its kind and the exclusive end offset of its
/// payload (needed to skip unknown blocks, and to re-sync after a known
/// block in case a reader undershoots or overshoots the declared size).
pub struct BlockEnvelope {
    pub kind: BlockKind,
    pub payload_start: u64,
    pub payload_end: u64,
}

/// Reads the next top-level object's tag and type header, returning `None`
/// once the terminating `NullReference` tag is reached.
pub fn next_block<R: Read + Seek>(reader: &mut StreamReader<R>) -> Result<Option<BlockEnvelope>> {
    let tag_offset = reader.position()?.0;
    let tag = ObjectTag::read(reader.get_mut()).map_err(|e| crate::error::DecodeError::InvalidFormat {
        offset: tag_offset,
        message: e.to_string(),
    })?;

    if tag == ObjectTag::NullReference {
        debug!("reached end-of-stream null reference tag");
        return Ok(None);
    }

    let type_offset = reader.position()?.0;
    let type_object = TypeObject::read(reader.get_mut()).map_err(|e| crate::error::DecodeError::InvalidFormat {
        offset: type_offset,
        message: e.to_string(),
    })?;

    let size_offset = reader.position()?.0;
    let declared_size = reader.read_u32()? as u64;
    let payload_start = reader.position()?.0;
    let payload_end = payload_start + declared_size;

    let kind = BlockKind::from_type_name(type_object.type_name.as_str());
    if let BlockKind::Unknown(name) = &kind {
        warn!("skipping unknown block kind {name:?} at offset {size_offset} ({declared_size} bytes)");
    }

    Ok(Some(BlockEnvelope {
        kind,
        payload_start,
        payload_end,
    }))
}

/// Advances past a block's payload (and its trailing `EndObject` tag plus
/// 4-byte alignment padding), whether or not its contents were actually
/// parsed. Used both for `BlockKind::Unknown` and after a recognized block
/// has been consumed, so framing never depends on a handler reading exactly
/// the declared number of bytes.
pub fn skip_to_end_of_block<R: Read + Seek>(
    reader: &mut StreamReader<R>,
    envelope: &BlockEnvelope,
) -> Result<()> {
    reader.goto(crate::reader::Position(envelope.payload_end))?;
    let end_tag_offset = reader.position()?.0;
    let _end_tag = ObjectTag::read(reader.get_mut()).map_err(|e| crate::error::DecodeError::InvalidFormat {
        offset: end_tag_offset,
        message: e.to_string(),
    })?;
    reader.align_to(4)?;
    Ok(())
}
