//! Harness errors.

use racereplay_core::CoreError;
use std::path::PathBuf;

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Harness failure
///
/// None of these describe the replay itself: a failed or timed-out session
/// still produces a report.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The session config is unreadable or invalid
    #[error("Invalid session config: {0}")]
    Config(#[from] CoreError),

    /// The controller process could not be started
    #[error("Failed to start controller {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or signalling the controller failed
    #[error("Failed to supervise controller: {0}")]
    Supervise(#[source] std::io::Error),

    /// Filesystem error around the report or scratch directory
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report encoding failed
    #[error("Failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
