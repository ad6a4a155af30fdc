//! RACEREPLAY Replay Controller
//!
//! Forces a fresh run of a multi-threaded program through a recorded thread
//! schedule, one checkpoint at a time, and reads back the race counters the
//! instrumented program leaves behind.
//!
//! The controller never talks to the operating system directly. Everything it
//! needs from a debugger lives behind [`ProcessControl`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod engine;
pub mod launch;
pub mod stats;
pub mod trace;

pub use control::{BreakpointHandle, ControlError, ProcessControl, ResumeOutcome, StopReason};
pub use engine::{FailureReason, ReplayConfig, ReplayController, ReplayReport, ReplaySession, SessionState};
pub use launch::{ExecFollow, ExecutionPolicy, ForkFollow, TargetSpec};
pub use stats::{Outcome, RaceStatistics, ReportMode, STAT_PATH_ENV};
pub use trace::{Checkpoint, MalformedLine, Trace, TraceLineError};
