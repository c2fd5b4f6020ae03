//! Top-level decoder driving loop, wiring every other module together the
//! way `EventPipeParser::next_event` (`coreclr-tracing/src/nettrace/parser.rs`)
//! drives the teacher's decode, generalized to the full module set this
//! format needs (sorting, provider GUIDs, generic payload decoding) that the
//! teacher's CoreCLR-only parser doesn't.

use std::io::{Read, Seek};

use binrw::BinRead;
use log::{info, warn};

use crate::block::{next_block, skip_to_end_of_block, BlockEnvelope, BlockKind};
use crate::config::DecoderConfig;
use crate::dispatch::{EventRecord, EventSink};
use crate::error::Result;
use crate::event_header::{
    read_compressed_header, read_fixed_header, read_flat_event_header, PreviousEventState,
};
use crate::header::{read_trace_header, TraceParameters};
use crate::metadata::{parse_metadata_entry, MetadataRegistry};
use crate::payload::decode_payload;
use crate::reader::{Position, StreamReader};
use crate::sorter::EventSorter;
use crate::stack::StackCache;
use crate::wire::{BlockHeaderPrefix, SequencePointBlockBody, StackBlockBody};

const HEADER_COMPRESSED_FLAG: i16 = 0x1;

#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeStats {
    pub events_dispatched: u64,
    pub events_lost: u64,
    pub events_with_unknown_metadata: u64,
}

pub struct EventPipeDecoder<R> {
    reader: StreamReader<R>,
    config: DecoderConfig,
    trace: TraceParameters,
    metadata: MetadataRegistry,
    stacks: StackCache,
}

impl<R: Read + Seek> EventPipeDecoder<R> {
    pub fn new(source: R) -> Result<Self> {
        Self::with_config(source, DecoderConfig::from_env())
    }

    pub fn with_config(source: R, config: DecoderConfig) -> Result<Self> {
        let mut reader = StreamReader::new(source);
        let trace = read_trace_header(&mut reader)?;
        info!(
            "decoding trace format v{} (pid {}, {} processors)",
            trace.file_format_version, trace.process_id, trace.number_of_processors
        );
        Ok(EventPipeDecoder {
            reader,
            config,
            trace,
            metadata: MetadataRegistry::new(),
            stacks: StackCache::new(),
        })
    }

    pub fn trace_parameters(&self) -> &TraceParameters {
        &self.trace
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes the whole stream, handing every event to `sink` in final
    /// timestamp order.
    pub fn decode_all(&mut self, sink: &mut impl EventSink) -> Result<DecodeStats> {
        let mut stats = DecodeStats::default();

        sink.start_dispatch();

        if self.trace.file_format_version < 4 {
            self.decode_flat_event_stream(sink, &mut stats)?;
            sink.stop_dispatch();
            return Ok(stats);
        }

        let mut sorter = EventSorter::new();

        while let Some(envelope) = next_block(&mut self.reader)? {
            match &envelope.kind {
                BlockKind::MetadataBlock => self.handle_metadata_block(&envelope)?,
                BlockKind::EventBlock => {
                    self.handle_event_block(&envelope, &mut sorter, &mut stats)?
                }
                BlockKind::StackBlock => self.handle_stack_block(&envelope)?,
                BlockKind::SequencePointBlock => {
                    self.handle_sequence_point_block(&envelope, &mut sorter, sink, &mut stats)?
                }
                BlockKind::Unknown(_) => {}
            }
            skip_to_end_of_block(&mut self.reader, &envelope)?;
        }

        for record in sorter.flush() {
            stats.events_dispatched += 1;
            sink.on_event(&record);
        }
        stats.events_lost = sorter.events_lost();
        self.stacks.flush();

        sink.stop_dispatch();
        Ok(stats)
    }

    /// V1-V3's flat, block-free event stream (spec.md:91): events are
    /// directly concatenated, with no `EventBlock`/`MetadataBlock` wrappers
    /// and hence no sequencing or sorting — each record is dispatched as soon
    /// as it's decoded. V1/V2 bound the loop by the forward reference read in
    /// `read_trace_header`; V3 has no such bound and instead reads until the
    /// stream is exhausted.
    fn decode_flat_event_stream(
        &mut self,
        sink: &mut impl EventSink,
        stats: &mut DecodeStats,
    ) -> Result<()> {
        let end_bound = self.trace.end_of_event_stream;

        loop {
            if let Some(end) = end_bound {
                if self.reader.position()?.0 >= end {
                    break;
                }
            }
            if self.reader.peek(4).is_err() {
                break;
            }

            let header = read_flat_event_header(&mut self.reader)?;
            let payload_bytes = self.reader.read(header.payload_size as usize)?;
            let stack_size = self.reader.read_i32()? as usize;
            let stack = if stack_size > 0 {
                Some(self.reader.read(stack_size)?)
            } else {
                None
            };

            if header.metadata_id == 0 {
                let entry_end = payload_bytes.len() as u64;
                let mut meta_reader = StreamReader::from_bytes(payload_bytes);
                let real_metadata_id = meta_reader.read_u32()?;
                let entry = parse_metadata_entry(&mut meta_reader, real_metadata_id, entry_end)?;
                self.metadata.insert(entry);
                continue;
            }

            match self.metadata.get(header.metadata_id) {
                None => {
                    warn!("dropping event with unknown metadata id {}", header.metadata_id);
                    stats.events_with_unknown_metadata += 1;
                }
                Some(meta) => {
                    let mut payload_reader = StreamReader::from_bytes(payload_bytes);
                    let fields = decode_payload(&mut payload_reader, &meta.parameters)?;
                    let record = EventRecord {
                        metadata_id: header.metadata_id,
                        event_id: meta.event_id,
                        provider_name: meta.provider_name.clone(),
                        provider_guid: meta.provider_guid,
                        event_name: meta.event_name.clone(),
                        version: meta.version,
                        level: meta.level,
                        keywords: meta.keywords,
                        opcode: meta.opcode,
                        timestamp: header.timestamp,
                        process_id: self.trace.process_id,
                        thread_id: header.thread_id,
                        processor_number: 0,
                        activity_id: header.activity_id,
                        related_activity_id: header.related_activity_id,
                        fields,
                        stack,
                    };
                    stats.events_dispatched += 1;
                    sink.on_event(&record);
                }
            }
        }
        Ok(())
    }

    fn block_header_prefix(&mut self, envelope: &BlockEnvelope) -> Result<(BlockHeaderPrefix, bool)> {
        let prefix = BlockHeaderPrefix::read(self.reader.get_mut())
            .map_err(|e| crate::error::DecodeError::InvalidFormat {
                offset: envelope.payload_start,
                message: e.to_string(),
            })?;
        let events_start = envelope.payload_start + prefix.header_size as u64;
        self.reader.goto(Position(events_start))?;
        let compressed = prefix.flags & HEADER_COMPRESSED_FLAG != 0;
        Ok((prefix, compressed))
    }

    /// A `MetadataBlock` is framed exactly like an `EventBlock` (spec.md:82-83):
    /// the same fixed/compressed event-header decode, with every entry's
    /// `metadataId` equal to 0 (spec.md:115) and its payload holding the
    /// metadata blob, which itself opens with the real, registered
    /// `metadataId` (spec.md:123).
    fn handle_metadata_block(&mut self, envelope: &BlockEnvelope) -> Result<()> {
        let (_prefix, compressed) = self.block_header_prefix(envelope)?;
        let mut previous = PreviousEventState::default();

        while self.reader.position()?.0 < envelope.payload_end {
            let header = if compressed {
                read_compressed_header(&mut self.reader, &previous)?
            } else {
                read_fixed_header(&mut self.reader, self.trace.file_format_version)?
            };
            previous = PreviousEventState::from(&header);

            let payload_bytes = self.reader.read(header.payload_size as usize)?;
            let entry_end = payload_bytes.len() as u64;
            let mut meta_reader = StreamReader::from_bytes(payload_bytes);
            let metadata_id = meta_reader.read_u32()?;
            let entry = parse_metadata_entry(&mut meta_reader, metadata_id, entry_end)?;
            self.metadata.insert(entry);

            self.reader.align_to(4)?;
        }
        Ok(())
    }

    fn handle_event_block(
        &mut self,
        envelope: &BlockEnvelope,
        sorter: &mut EventSorter,
        stats: &mut DecodeStats,
    ) -> Result<()> {
        let (_prefix, compressed) = self.block_header_prefix(envelope)?;
        let mut previous = PreviousEventState::default();

        while self.reader.position()?.0 < envelope.payload_end {
            let header = if compressed {
                read_compressed_header(&mut self.reader, &previous)?
            } else {
                read_fixed_header(&mut self.reader, self.trace.file_format_version)?
            };
            previous = PreviousEventState::from(&header);

            let payload_bytes = self.reader.read(header.payload_size as usize)?;

            match self.metadata.get(header.metadata_id) {
                None => {
                    warn!("dropping event with unknown metadata id {}", header.metadata_id);
                    stats.events_with_unknown_metadata += 1;
                }
                Some(meta) => {
                    let mut payload_reader = StreamReader::from_bytes(payload_bytes);
                    let fields = decode_payload(&mut payload_reader, &meta.parameters)?;
                    let record = EventRecord {
                        metadata_id: header.metadata_id,
                        event_id: meta.event_id,
                        provider_name: meta.provider_name.clone(),
                        provider_guid: meta.provider_guid,
                        event_name: meta.event_name.clone(),
                        version: meta.version,
                        level: meta.level,
                        keywords: meta.keywords,
                        opcode: meta.opcode,
                        timestamp: header.timestamp,
                        process_id: self.trace.process_id,
                        thread_id: header.thread_id,
                        processor_number: header.processor_number,
                        activity_id: header.activity_id,
                        related_activity_id: header.related_activity_id,
                        fields,
                        stack: self.stacks.get(header.stack_id as u32).map(<[u8]>::to_vec),
                    };
                    sorter.push(header.capture_thread_id, header.sequence_number, record);
                }
            }

            self.reader.align_to(4)?;
        }
        Ok(())
    }

    fn handle_stack_block(&mut self, envelope: &BlockEnvelope) -> Result<()> {
        let body = StackBlockBody::read(self.reader.get_mut())
            .map_err(|e| crate::error::DecodeError::InvalidFormat {
                offset: envelope.payload_start,
                message: e.to_string(),
            })?;
        for (i, entry) in body.stacks.into_iter().enumerate() {
            self.stacks.insert(body.first_id + i as u32, entry.bytes);
        }
        Ok(())
    }

    fn handle_sequence_point_block(
        &mut self,
        envelope: &BlockEnvelope,
        sorter: &mut EventSorter,
        sink: &mut impl EventSink,
        stats: &mut DecodeStats,
    ) -> Result<()> {
        let body = SequencePointBlockBody::read(self.reader.get_mut())
            .map_err(|e| crate::error::DecodeError::InvalidFormat {
                offset: envelope.payload_start,
                message: e.to_string(),
            })?;

        // Flush whatever is already queued *before* reconciling: each pending
        // event must update `lastDispatchedSeq` through the normal per-event
        // gap accounting first, or the sequence point's declared number would
        // clobber that baseline and mask any real gap within the queue itself.
        for record in sorter.flush() {
            stats.events_dispatched += 1;
            sink.on_event(&record);
        }

        let thread_sequence_numbers: Vec<(i64, i32)> = body
            .thread_sequence_numbers
            .iter()
            .map(|t| (t.capture_thread_id, t.sequence_number))
            .collect();
        sorter.apply_sequence_point(&thread_sequence_numbers);
        stats.events_lost = sorter.events_lost();
        self.stacks.flush();
        Ok(())
    }
}
