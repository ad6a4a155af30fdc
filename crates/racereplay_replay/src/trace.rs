//! Checkpoint traces.
//!
//! A trace is the thread schedule captured from a racy run, one
//! `thread_id:hex_offset` pair per line. Order is the schedule, so the parsed
//! sequence keeps input order exactly.

use racereplay_core::{CoreError, CoreResult, ModuleOffset, ThreadId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One (thread, program point) constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread that must reach the point
    pub thread_id: ThreadId,
    /// Module-relative offset of the point, zero for "no constraint"
    pub offset: ModuleOffset,
}

impl Checkpoint {
    /// Create a new checkpoint
    #[must_use]
    pub fn new(thread_id: u32, offset: u64) -> Self {
        Self {
            thread_id: ThreadId::from_raw(thread_id),
            offset: ModuleOffset::from_raw(offset),
        }
    }

    /// Whether a breakpoint must be reached for this checkpoint
    #[must_use]
    pub fn is_constrained(&self) -> bool {
        !self.offset.is_unconstrained()
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:x}", self.thread_id, self.offset.as_u64())
    }
}

/// Reason a trace line was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceLineError {
    /// No `:` separator
    #[error("missing ':' separator")]
    MissingSeparator,

    /// More than one `:` separator
    #[error("too many ':' separators")]
    ExtraSeparator,

    /// Thread field is not a decimal integer
    ///
    /// gdb thread numbers start at 1, so a signed id such as `-1` is
    /// rejected here rather than left to fail the thread switch mid-replay.
    #[error("invalid thread id {0:?}")]
    BadThreadId(String),

    /// Offset field is not hexadecimal
    #[error("invalid hex offset {0:?}")]
    BadOffset(String),
}

/// A dropped line and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    /// 1-based line number
    pub line: usize,
    /// Line text, trimmed
    pub text: String,
    /// Rejection reason
    pub error: TraceLineError,
}

/// Parse a single non-blank trace line
///
/// # Errors
///
/// Returns error if the line is not `decimal:hex`
pub fn parse_line(line: &str) -> Result<Checkpoint, TraceLineError> {
    let mut fields = line.split(':');
    let (tid, offset) = match (fields.next(), fields.next(), fields.next()) {
        (Some(tid), Some(offset), None) => (tid.trim(), offset.trim()),
        (_, None, _) => return Err(TraceLineError::MissingSeparator),
        _ => return Err(TraceLineError::ExtraSeparator),
    };

    let thread_id = tid
        .parse::<u32>()
        .map_err(|_| TraceLineError::BadThreadId(tid.to_string()))?;

    let digits = offset
        .strip_prefix("0x")
        .or_else(|| offset.strip_prefix("0X"))
        .unwrap_or(offset);
    let offset = u64::from_str_radix(digits, 16)
        .map_err(|_| TraceLineError::BadOffset(offset.to_string()))?;

    Ok(Checkpoint::new(thread_id, offset))
}

/// Ordered checkpoint schedule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    checkpoints: Vec<Checkpoint>,
}

impl Trace {
    /// Create an empty trace
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a trace from checkpoints, in schedule order
    #[must_use]
    pub fn from_checkpoints(checkpoints: Vec<Checkpoint>) -> Self {
        Self { checkpoints }
    }

    /// Read and parse a trace file
    ///
    /// Malformed lines are logged and dropped; only an unreadable file fails.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn parse(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        Ok(Self::from_text(&text))
    }

    /// Parse trace text, logging malformed lines
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let (trace, malformed) = Self::from_text_with_warnings(text);
        for bad in &malformed {
            tracing::warn!(
                line = bad.line,
                text = %bad.text,
                error = %bad.error,
                "trace format error, line skipped"
            );
        }
        trace
    }

    /// Parse trace text, returning malformed lines to the caller
    #[must_use]
    pub fn from_text_with_warnings(text: &str) -> (Self, Vec<MalformedLine>) {
        let mut checkpoints = Vec::new();
        let mut malformed = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(cp) => checkpoints.push(cp),
                Err(error) => malformed.push(MalformedLine {
                    line: idx + 1,
                    text: line.to_string(),
                    error,
                }),
            }
        }

        (Self { checkpoints }, malformed)
    }

    /// Checkpoints in schedule order
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Get checkpoint at position
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }

    /// Number of checkpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Whether the trace is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Iterate in schedule order
    pub fn iter(&self) -> std::slice::Iter<'_, Checkpoint> {
        self.checkpoints.iter()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Checkpoint;
    type IntoIter = std::slice::Iter<'a, Checkpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.checkpoints.iter()
    }
}
