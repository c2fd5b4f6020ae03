//! Stack cache (spec §4.7).
//!
//! Grounded on the teacher's `StackBlock`/`StackStack` handling in
//! `coreclr-tracing/src/nettrace/mod.rs`, generalized to expose lookup and
//! an explicit `flush` rather than assuming the caller holds every stack
//! until end of stream.

use std::collections::HashMap;

use log::debug;

/// `stackId -> raw stack frame bytes` (native addresses, opaque to this
/// layer; the symbolizing side is out of scope per spec's Non-goals).
#[derive(Debug, Default)]
pub struct StackCache {
    stacks: HashMap<u32, Vec<u8>>,
}

impl StackCache {
    pub fn new() -> Self {
        StackCache::default()
    }

    pub fn insert(&mut self, stack_id: u32, bytes: Vec<u8>) {
        self.stacks.insert(stack_id, bytes);
    }

    pub fn get(&self, stack_id: u32) -> Option<&[u8]> {
        self.stacks.get(&stack_id).map(Vec::as_slice)
    }

    /// Drops every cached stack. Called on a `SPBlock` sequence point and at
    /// end of stream (spec §4.7): once a sequence point has been emitted, no
    /// future event can reference a stack recorded before it.
    pub fn flush(&mut self) {
        debug!("flushing stack cache ({} entries)", self.stacks.len());
        self.stacks.clear();
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}
