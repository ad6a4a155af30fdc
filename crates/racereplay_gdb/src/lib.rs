//! RACEREPLAY GDB backend
//!
//! Implements [`racereplay_replay::ProcessControl`] by driving `gdb` through
//! its machine interface. The target runs under gdb exactly as it would in an
//! interactive session with scheduler locking on, so one thread moves at a
//! time.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod mappings;
pub mod mi;

pub use backend::{GdbBackend, GdbConfig, GdbError};
pub use mi::{MiRecord, MiValue, ResultClass};
