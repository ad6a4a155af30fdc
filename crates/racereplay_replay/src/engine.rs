//! Replay controller.
//!
//! Walks a [`Trace`] against a live target, one checkpoint at a time. For
//! each checkpoint the named thread becomes the only runnable thread and is
//! resumed until it reaches the recorded point. Checkpoint `k + 1` is never
//! attempted before checkpoint `k` resolved, so the replayed happens-before
//! order is the trace order.
//!
//! ```text
//! SettingUp ──base resolved──▶ Replaying ──trace exhausted──▶ Succeeded
//!     │                            │
//!     └──────setup failure─────────┴──schedule violation──▶ Failed
//! ```

use crate::control::{ControlError, ProcessControl, ResumeOutcome, StopReason};
use crate::launch::{self, ExecutionPolicy, TargetSpec};
use crate::trace::{Checkpoint, Trace};
use racereplay_core::{Address, ModuleOffset, SessionConfig, ThreadId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replay controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// How long one thread may take to reach one checkpoint
    pub step_timeout: Duration,
    /// Execution policy applied before the target starts
    pub policy: ExecutionPolicy,
}

impl ReplayConfig {
    /// Config matching a session config
    #[must_use]
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            step_timeout: config.step_timeout_duration(),
            policy: ExecutionPolicy::new(),
        }
    }

    /// Set step timeout
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set execution policy
    #[must_use]
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(500),
            policy: ExecutionPolicy::new(),
        }
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Backend setup and base resolution
    SettingUp,
    /// Enforcing checkpoints
    Replaying,
    /// Every checkpoint enforced
    Succeeded,
    /// Setup failure or schedule violation
    Failed,
}

/// Why a session failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailureReason {
    /// A backend setup call failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// The module load base could not be resolved
    #[error("cannot compute relocation offset")]
    BaseUnresolved,

    /// The checkpoint's thread does not exist
    #[error("cannot switch to thread {thread} at checkpoint {index}")]
    ThreadMissing { index: usize, thread: ThreadId },

    /// The thread did not reach its point within the step timeout
    #[error("thread {thread} did not reach {offset} in time at checkpoint {index}")]
    StepTimeout {
        index: usize,
        thread: ThreadId,
        offset: ModuleOffset,
    },

    /// The target exited before the thread reached its point
    #[error("target exited before thread {thread} reached {offset} at checkpoint {index}")]
    TargetExited {
        index: usize,
        thread: ThreadId,
        offset: ModuleOffset,
    },

    /// Relocating the offset overflowed the address space
    #[error("offset {offset} overflows base {base} at checkpoint {index}")]
    AddressOverflow {
        index: usize,
        offset: ModuleOffset,
        base: Address,
    },

    /// The backend failed mid-replay
    #[error("backend error at checkpoint {index}: {message}")]
    Backend { index: usize, message: String },
}

fn backend_failure(index: usize, err: ControlError) -> FailureReason {
    FailureReason::Backend {
        index,
        message: err.to_string(),
    }
}

/// Mutable state of one replay attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySession {
    target: TargetSpec,
    base_address: Option<Address>,
    cursor: usize,
    failed: bool,
    state: SessionState,
    failure: Option<FailureReason>,
}

impl ReplaySession {
    /// Create a session for a target
    #[must_use]
    pub fn new(target: TargetSpec) -> Self {
        Self {
            target,
            base_address: None,
            cursor: 0,
            failed: false,
            state: SessionState::SettingUp,
            failure: None,
        }
    }

    /// Process under replay
    #[must_use]
    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    /// Module load base, once resolved
    #[must_use]
    pub fn base_address(&self) -> Option<Address> {
        self.base_address
    }

    /// Index of the checkpoint being enforced
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the session has failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failure reason, if failed
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    fn fail(&mut self, reason: FailureReason) {
        self.failed = true;
        self.state = SessionState::Failed;
        self.failure = Some(reason);
    }
}

/// Summary of one replay attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Terminal state
    pub state: SessionState,
    /// Checkpoints in the trace
    pub checkpoints_total: usize,
    /// Checkpoints enforced before the session ended
    pub checkpoints_completed: usize,
    /// Unconstrained checkpoints whose resume timed out
    pub tolerated_timeouts: usize,
    /// Extra single steps taken at thread-creation stops
    pub clone_corrections: usize,
    /// Resolved module base
    pub base_address: Option<Address>,
    /// Failure reason
    pub failure: Option<FailureReason>,
}

impl ReplayReport {
    /// Whether the whole trace was enforced
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Succeeded
    }
}

/// Enforces a trace against a backend
pub struct ReplayController<B: ProcessControl> {
    backend: B,
    trace: Trace,
    session: ReplaySession,
    config: ReplayConfig,
    tolerated_timeouts: usize,
    clone_corrections: usize,
}

impl<B: ProcessControl> ReplayController<B> {
    /// Create a controller with the default config
    #[must_use]
    pub fn new(backend: B, trace: Trace, target: TargetSpec) -> Self {
        Self {
            backend,
            trace,
            session: ReplaySession::new(target),
            config: ReplayConfig::default(),
            tolerated_timeouts: 0,
            clone_corrections: 0,
        }
    }

    /// Create with custom config
    #[must_use]
    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// Session state
    #[must_use]
    pub fn session(&self) -> &ReplaySession {
        &self.session
    }

    /// Underlying backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run setup, enforce the trace, then tear the target down
    ///
    /// One call is one deterministic attempt. A second call returns the
    /// report of the first without touching the backend.
    pub async fn run(&mut self) -> ReplayReport {
        if self.session.state != SessionState::SettingUp {
            return self.report();
        }

        self.setup().await;
        if !self.session.failed {
            self.replay().await;
        }
        self.teardown().await;

        let report = self.report();
        match &report.failure {
            None => tracing::info!(
                checkpoints = report.checkpoints_completed,
                tolerated_timeouts = report.tolerated_timeouts,
                clone_corrections = report.clone_corrections,
                "replay succeeded"
            ),
            Some(reason) => tracing::warn!(
                completed = report.checkpoints_completed,
                total = report.checkpoints_total,
                %reason,
                "replay failed"
            ),
        }
        report
    }

    /// Current report
    #[must_use]
    pub fn report(&self) -> ReplayReport {
        ReplayReport {
            state: self.session.state,
            checkpoints_total: self.trace.len(),
            checkpoints_completed: self.session.cursor,
            tolerated_timeouts: self.tolerated_timeouts,
            clone_corrections: self.clone_corrections,
            base_address: self.session.base_address,
            failure: self.session.failure.clone(),
        }
    }

    async fn setup(&mut self) {
        match launch::prepare(&mut self.backend, &self.session.target, &self.config.policy).await
        {
            Ok(Some(base)) => {
                self.session.base_address = Some(base);
                self.session.state = SessionState::Replaying;
            }
            Ok(None) => self.session.fail(FailureReason::BaseUnresolved),
            Err(e) => self.session.fail(FailureReason::Setup(e.to_string())),
        }
    }

    async fn replay(&mut self) {
        while let Some(checkpoint) = self.trace.get(self.session.cursor).copied() {
            if let Err(reason) = self.enforce(self.session.cursor, checkpoint).await {
                self.session.fail(reason);
                return;
            }
            self.session.cursor += 1;
        }
        self.session.state = SessionState::Succeeded;
    }

    async fn enforce(&mut self, index: usize, checkpoint: Checkpoint) -> Result<(), FailureReason> {
        tracing::debug!(index, thread = %checkpoint.thread_id, offset = %checkpoint.offset, "run");

        let switched = self
            .backend
            .switch_active_thread(checkpoint.thread_id)
            .await
            .map_err(|e| backend_failure(index, e))?;
        if !switched {
            return Err(FailureReason::ThreadMissing {
                index,
                thread: checkpoint.thread_id,
            });
        }

        let breakpoint = if checkpoint.is_constrained() {
            let base = self
                .session
                .base_address
                .ok_or(FailureReason::BaseUnresolved)?;
            let address = checkpoint.offset.relocate(base).ok_or(
                FailureReason::AddressOverflow {
                    index,
                    offset: checkpoint.offset,
                    base,
                },
            )?;
            let handle = self
                .backend
                .set_temporary_breakpoint(address)
                .await
                .map_err(|e| backend_failure(index, e))?;
            Some(handle)
        } else {
            None
        };

        match self.backend.resume_with_timeout(self.config.step_timeout).await {
            Ok(ResumeOutcome::Stopped(StopReason::Exited)) if checkpoint.is_constrained() => {
                return Err(FailureReason::TargetExited {
                    index,
                    thread: checkpoint.thread_id,
                    offset: checkpoint.offset,
                });
            }
            Ok(ResumeOutcome::Stopped(reason)) => {
                tracing::trace!(index, ?reason, "stopped");
            }
            Ok(ResumeOutcome::TimedOut) if checkpoint.is_constrained() => {
                return Err(FailureReason::StepTimeout {
                    index,
                    thread: checkpoint.thread_id,
                    offset: checkpoint.offset,
                });
            }
            Ok(ResumeOutcome::TimedOut) => {
                // No address constraint: the switch alone was the intent.
                self.tolerated_timeouts += 1;
                tracing::trace!(index, "unconstrained step timed out");
            }
            Err(e) => return Err(backend_failure(index, e)),
        }

        self.correct_clone_site(index).await?;

        if let Some(handle) = breakpoint {
            if let Err(e) = self.backend.remove_breakpoint(handle).await {
                tracing::debug!(%handle, error = %e, "breakpoint already gone");
            }
        }
        Ok(())
    }

    /// Step once past a stop inside thread-creation machinery, where the new
    /// thread's identity is not yet established.
    async fn correct_clone_site(&mut self, index: usize) -> Result<(), FailureReason> {
        let frame = match self.backend.current_frame_name().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "no frame to inspect");
                None
            }
        };

        if let Some(name) = frame {
            if self.config.policy.is_thread_creation_frame(&name) {
                self.backend
                    .single_step()
                    .await
                    .map_err(|e| backend_failure(index, e))?;
                self.clone_corrections += 1;
                tracing::debug!(index, frame = %name, "stepped past thread creation");
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.backend.terminate().await {
            tracing::warn!(error = %e, "failed to terminate target");
        }
    }
}
