//! Decoder configuration, resolved once up front the way the teacher resolves
//! its CoreCLR provider keyword mask from environment at trace-manager
//! construction time (`samply/src/shared/coreclr/eventpipe_trace_manager.rs`).
//!
//! `TRACE_EVENT_ENABLE_INSTRUMENTATION` opts into the log-rotation
//! instrumentation hooks described in spec §5/§9; it is off by default so a
//! plain `cargo test` run never touches the filesystem.

use std::env;

const INSTRUMENTATION_ENV_VAR: &str = "TRACE_EVENT_ENABLE_INSTRUMENTATION";

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub instrumentation_enabled: bool,
}

impl DecoderConfig {
    pub fn from_env() -> Self {
        let instrumentation_enabled = env::var(INSTRUMENTATION_ENV_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        DecoderConfig {
            instrumentation_enabled,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            instrumentation_enabled: false,
        }
    }
}
