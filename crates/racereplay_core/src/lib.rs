//! RACEREPLAY Core Types
//!
//! Pure types shared by the replay controller, its backends and the harness:
//! thread and address newtypes, the core error type and the session
//! configuration read from `REPRO_CONFIG`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;

// Re-exports
pub use config::{CONFIG_PATH_ENV, DEFAULT_STEP_TIMEOUT_SECS, SessionConfig};
pub use error::{CoreError, CoreResult};
pub use id::{Address, ModuleOffset, ThreadId};
