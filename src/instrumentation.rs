//! Optional log-rotation instrumentation (spec §5/§9), opt-in via
//! [`crate::config::DecoderConfig::instrumentation_enabled`].
//!
//! Grounded on the two-phase-swap rollover pattern used across the teacher's
//! workspace for profiler output files (`samply` writes a fresh profile file
//! per capture rather than appending); generalized here into a small
//! rotating writer that keeps the two most recent log files and swaps
//! between them under a lock rather than truncating in place, so a reader
//! racing the rollover never observes a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::info;

/// Rotates between `<prefix>.0.log` and `<prefix>.1.log`, keeping at most
/// those two files. `rotate()` closes the current file, opens the other
/// slot fresh, and becomes the active writer — callers hold the returned
/// writer across calls under their own synchronization or via the built-in
/// [`RotatingLog::write_line`], which takes the lock internally.
pub struct RotatingLog {
    prefix: PathBuf,
    state: Mutex<RotatingState>,
}

struct RotatingState {
    active_slot: u8,
    file: File,
}

impl RotatingLog {
    pub fn open(prefix: impl Into<PathBuf>) -> io::Result<Self> {
        let prefix = prefix.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(slot_path(&prefix, 0))?;
        Ok(RotatingLog {
            prefix,
            state: Mutex::new(RotatingState {
                active_slot: 0,
                file,
            }),
        })
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        writeln!(state.file, "{line}")
    }

    /// Swaps to the other slot, truncating it first. The previous slot is
    /// left on disk untouched as the one retained backup.
    pub fn rotate(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let next_slot = 1 - state.active_slot;
        let next_path = slot_path(&self.prefix, next_slot);
        let next_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&next_path)?;
        info!("rotating instrumentation log to {}", next_path.display());
        state.file = next_file;
        state.active_slot = next_slot;
        Ok(())
    }
}

fn slot_path(prefix: &Path, slot: u8) -> PathBuf {
    let mut path = prefix.to_path_buf();
    let file_name = format!(
        "{}.{}.log",
        prefix.file_name().and_then(|n| n.to_str()).unwrap_or("trace"),
        slot
    );
    path.set_file_name(file_name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_alternates_slots_and_preserves_the_previous_one() {
        let dir = std::env::temp_dir().join(format!("nettrace-instrumentation-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("decode");

        let log = RotatingLog::open(&prefix).unwrap();
        log.write_line("first").unwrap();
        log.rotate().unwrap();
        log.write_line("second").unwrap();

        assert!(slot_path(&prefix, 0).exists());
        assert!(slot_path(&prefix, 1).exists());

        let first_contents = fs::read_to_string(slot_path(&prefix, 0)).unwrap();
        assert!(first_contents.contains("first"));

        fs::remove_dir_all(&dir).ok();
    }
}
