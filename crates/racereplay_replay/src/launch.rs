//! Launch and execution environment setup.
//!
//! A multi-threaded target is only controllable deterministically if the
//! backend keeps every sibling thread suspended while one runs, keeps tracing
//! across fork and exec, and keeps the target's own output out of the way.

use crate::control::{ControlError, ProcessControl};
use racereplay_core::{Address, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which side of a fork stays under control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkFollow {
    /// Keep following the forking process
    Parent,
    /// Follow the new child
    Child,
}

/// What happens to control when the target execs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecFollow {
    /// Re-attach to the new image as a new inferior
    NewImage,
    /// Keep the old inferior identity
    SameInferior,
}

/// Backend-global execution policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Fork follow mode
    pub follow_fork: ForkFollow,
    /// Keep the non-followed side of a fork attached
    pub keep_fork_attached: bool,
    /// Exec follow mode
    pub follow_exec: ExecFollow,
    /// Only the active thread may run while resumed
    pub scheduler_locking: bool,
    /// Apply the lock across every inferior, not just the current one
    pub schedule_multiple: bool,
    /// Redirect the target's stdout and stderr to the null device
    pub suppress_output: bool,
    /// Stop whenever the target enters the thread-creation syscall
    pub catch_thread_creation: bool,
    /// Frame names that mark the thread-creation routine
    pub thread_creation_symbols: Vec<String>,
}

impl ExecutionPolicy {
    /// Create the replay policy
    #[must_use]
    pub fn new() -> Self {
        Self {
            follow_fork: ForkFollow::Parent,
            keep_fork_attached: true,
            follow_exec: ExecFollow::NewImage,
            scheduler_locking: true,
            schedule_multiple: true,
            suppress_output: true,
            catch_thread_creation: true,
            thread_creation_symbols: vec!["clone".to_string(), "clone3".to_string()],
        }
    }

    /// Keep or drop target output
    #[must_use]
    pub fn with_output_suppressed(mut self, suppress: bool) -> Self {
        self.suppress_output = suppress;
        self
    }

    /// Enable or disable the thread-creation catchpoint
    #[must_use]
    pub fn with_thread_creation_catch(mut self, catch: bool) -> Self {
        self.catch_thread_creation = catch;
        self
    }

    /// Replace the thread-creation frame names
    #[must_use]
    pub fn with_thread_creation_symbols(mut self, symbols: Vec<String>) -> Self {
        self.thread_creation_symbols = symbols;
        self
    }

    /// Whether `frame` is inside thread-creation machinery
    #[must_use]
    pub fn is_thread_creation_frame(&self, frame: &str) -> bool {
        self.thread_creation_symbols.iter().any(|s| s == frame)
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of the process under replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Executable path
    pub executable: PathBuf,
    /// Arguments forwarded to the executable
    pub arguments: Vec<String>,
}

impl TargetSpec {
    /// Create a new target
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, arguments: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            arguments,
        }
    }

    /// Target described by a session config
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.executable(), config.arguments().to_vec())
    }
}

/// Configure the backend, start the target and resolve its load base
///
/// Returns `Ok(None)` when the process started but its base address is
/// unknown.
///
/// # Errors
///
/// Returns error if any backend setup call fails
pub async fn prepare<B: ProcessControl + ?Sized>(
    backend: &mut B,
    target: &TargetSpec,
    policy: &ExecutionPolicy,
) -> Result<Option<Address>, ControlError> {
    backend.load_module(&target.executable).await?;
    backend.set_arguments(&target.arguments).await?;
    backend.set_policy(policy).await?;
    backend.start_process().await?;

    let base = backend.resolve_module_base().await?;
    match base {
        Some(addr) => tracing::debug!(base = %addr, "resolved module base"),
        None => tracing::error!(
            executable = %target.executable.display(),
            "fail to load base address"
        ),
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ExecutionPolicy::default();
        assert_eq!(policy.follow_fork, ForkFollow::Parent);
        assert!(policy.keep_fork_attached);
        assert_eq!(policy.follow_exec, ExecFollow::NewImage);
        assert!(policy.scheduler_locking);
        assert!(policy.schedule_multiple);
        assert!(policy.suppress_output);
        assert!(policy.catch_thread_creation);
    }

    #[test]
    fn test_policy_toggles() {
        let policy = ExecutionPolicy::new()
            .with_output_suppressed(false)
            .with_thread_creation_catch(false);
        assert!(!policy.suppress_output);
        assert!(!policy.catch_thread_creation);
        assert!(policy.scheduler_locking);

        let policy = policy
            .with_output_suppressed(true)
            .with_thread_creation_catch(true);
        assert_eq!(policy, ExecutionPolicy::default());
    }

    #[test]
    fn test_thread_creation_frames() {
        let policy = ExecutionPolicy::new();
        assert!(policy.is_thread_creation_frame("clone"));
        assert!(policy.is_thread_creation_frame("clone3"));
        assert!(!policy.is_thread_creation_frame("pthread_create"));

        let policy = policy.with_thread_creation_symbols(vec!["__clone".to_string()]);
        assert!(!policy.is_thread_creation_frame("clone"));
        assert!(policy.is_thread_creation_frame("__clone"));
    }

    #[test]
    fn test_target_from_config() {
        let config = SessionConfig::new(
            vec!["./bench".to_string(), "a b".to_string(), "-v".to_string()],
            "trace",
        );
        let target = TargetSpec::from_config(&config);
        assert_eq!(target.executable, PathBuf::from("./bench"));
        assert_eq!(target.arguments, vec!["a b".to_string(), "-v".to_string()]);
    }
}
