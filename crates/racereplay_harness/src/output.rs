//! Report files.

use crate::error::{HarnessError, HarnessResult};
use racereplay_replay::Outcome;
use std::path::Path;

/// Delete a report left by an earlier run
///
/// # Errors
///
/// Returns error if `path` exists but cannot be removed
pub fn remove_stale(path: impl AsRef<Path>) -> HarnessResult<()> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale report");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io(path, e)),
    }
}

/// Write triggered indices as a JSON array followed by a newline
///
/// A verdict outcome is written as its single boolean.
///
/// # Errors
///
/// Returns error if the file cannot be written
pub fn write_enumeration(path: impl AsRef<Path>, outcome: &Outcome) -> HarnessResult<()> {
    let path = path.as_ref();
    let mut text = match outcome {
        Outcome::Triggered(indices) => serde_json::to_string(indices)?,
        Outcome::Verdict(hit) => serde_json::to_string(hit)?,
    };
    text.push('\n');
    std::fs::write(path, text).map_err(|e| HarnessError::io(path, e))
}
