//! Process-control capability consumed by the replay controller.
//!
//! Any debugger-like backend can drive a replay as long as it implements
//! [`ProcessControl`]: a scriptable debugger, raw ptrace, or an emulator.

use crate::launch::ExecutionPolicy;
use async_trait::async_trait;
use racereplay_core::{Address, ThreadId};
use std::path::Path;
use std::time::Duration;

/// Opaque handle for an installed breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointHandle(u64);

impl BreakpointHandle {
    /// Create from a backend-specific number
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BreakpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bp#{}", self.0)
    }
}

/// Why the target halted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A breakpoint was hit
    Breakpoint,
    /// A syscall catchpoint fired (thread creation)
    SyscallEntry,
    /// A signal was delivered
    Signal(String),
    /// The process exited
    Exited,
    /// Anything else the backend reports
    Other(String),
}

/// Result of resuming the active thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Execution halted before the timeout
    Stopped(StopReason),
    /// The timeout elapsed and the backend halted the thread itself
    TimedOut,
}

/// Backend failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The backend rejected a command
    #[error("Command failed: {command}: {message}")]
    CommandFailed { command: String, message: String },

    /// The backend stopped responding or its transport broke
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend did not acknowledge a command in time
    #[error("Backend timed out: {0}")]
    Timeout(String),

    /// There is no live process to operate on
    #[error("No live process")]
    NoProcess,
}

/// Debugger-like operations needed to enforce a schedule
///
/// `resume_with_timeout` is the only operation expected to block on the
/// target. Every other call should return promptly.
#[async_trait]
pub trait ProcessControl: Send {
    /// Select the executable to debug
    async fn load_module(&mut self, path: &Path) -> Result<(), ControlError>;

    /// Set the argument list forwarded to the target
    async fn set_arguments(&mut self, args: &[String]) -> Result<(), ControlError>;

    /// Apply fork/exec, scheduler-locking and output policy
    async fn set_policy(&mut self, policy: &ExecutionPolicy) -> Result<(), ControlError>;

    /// Create the process, stopped at its first instruction
    async fn start_process(&mut self) -> Result<(), ControlError>;

    /// Runtime load address of the target module, `None` if unknown
    async fn resolve_module_base(&mut self) -> Result<Option<Address>, ControlError>;

    /// Insert a one-shot breakpoint
    async fn set_temporary_breakpoint(
        &mut self,
        address: Address,
    ) -> Result<BreakpointHandle, ControlError>;

    /// Make `thread` the only thread allowed to run; `false` if it does not exist
    async fn switch_active_thread(&mut self, thread: ThreadId) -> Result<bool, ControlError>;

    /// Resume the active thread until it stops or `timeout` elapses
    async fn resume_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<ResumeOutcome, ControlError>;

    /// Execute exactly one instruction on the active thread
    async fn single_step(&mut self) -> Result<(), ControlError>;

    /// Function name of the active thread's innermost frame
    async fn current_frame_name(&mut self) -> Result<Option<String>, ControlError>;

    /// Delete a breakpoint; succeeds if it was already consumed
    async fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), ControlError>;

    /// Kill the target and release the backend
    async fn terminate(&mut self) -> Result<(), ControlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_handle() {
        let handle = BreakpointHandle::from_raw(4);
        assert_eq!(handle.as_u64(), 4);
        assert_eq!(handle.to_string(), "bp#4");
    }

    #[test]
    fn test_control_error_display() {
        let err = ControlError::CommandFailed {
            command: "-thread-select 9".to_string(),
            message: "Invalid thread id: 9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command failed: -thread-select 9: Invalid thread id: 9"
        );
        assert_eq!(ControlError::NoProcess.to_string(), "No live process");
    }
}
