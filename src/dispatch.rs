//! Dispatcher adapter (spec §4.9).
//!
//! `EventSink` generalizes the consumer-side interface the teacher's
//! `samply/src/shared/coreclr/eventpipe_trace_manager.rs` plays for its
//! `EventpipeTraceManager`: that type is itself the out-of-scope downstream
//! collaborator (profiler-specific aggregation), so only the shape of the
//! hand-off — one decoded record at a time, plus start/stop instrumentation
//! hooks — is kept here.

use log::info;
use uuid::Uuid;

use crate::payload::FieldValue;

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub metadata_id: u32,
    pub event_id: u32,
    pub provider_name: String,
    pub provider_guid: Uuid,
    pub event_name: String,
    pub version: u32,
    pub level: u32,
    pub keywords: u64,
    pub opcode: u32,
    pub timestamp: i64,
    pub process_id: u32,
    pub thread_id: i64,
    pub processor_number: i32,
    pub activity_id: Uuid,
    pub related_activity_id: Uuid,
    pub fields: Vec<(String, FieldValue)>,
    pub stack: Option<Vec<u8>>,
}

/// Downstream collaborator that receives decoded events one at a time, in
/// final sorted order. Building a real aggregator on top of this is out of
/// scope (spec Non-goals) — this crate only defines the seam.
pub trait EventSink {
    fn on_event(&mut self, event: &EventRecord);

    fn start_dispatch(&mut self) {
        info!("dispatch starting");
    }

    fn stop_dispatch(&mut self) {
        info!("dispatch stopped");
    }
}

/// Minimal sink used by the decoder's own tests and available to consumers
/// that just want every event collected into memory.
#[derive(Default)]
pub struct VecSink {
    pub events: Vec<EventRecord>,
}

impl EventSink for VecSink {
    fn on_event(&mut self, event: &EventRecord) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_collects_in_order() {
        let mut sink = VecSink::default();
        sink.start_dispatch();
        for ts in [1, 2, 3] {
            sink.on_event(&EventRecord {
                metadata_id: 1,
                event_id: 1,
                provider_name: "P".into(),
                provider_guid: Uuid::nil(),
                event_name: "E".into(),
                version: 0,
                level: 0,
                keywords: 0,
                opcode: 0,
                timestamp: ts,
                process_id: 0,
                thread_id: 0,
                processor_number: 0,
                activity_id: Uuid::nil(),
                related_activity_id: Uuid::nil(),
                fields: Vec::new(),
                stack: None,
            });
        }
        sink.stop_dispatch();
        assert_eq!(sink.events.len(), 3);
        assert_eq!(sink.events[2].timestamp, 3);
    }
}
