//! `gdb --interpreter=mi2` driven as a [`ProcessControl`] backend.

use crate::mappings;
use crate::mi::{self, AsyncKind, MiRecord, MiValue, ResultClass, StreamKind};
use async_trait::async_trait;
use racereplay_core::{Address, ThreadId};
use racereplay_replay::{
    BreakpointHandle, ControlError, ExecFollow, ExecutionPolicy, ForkFollow, ProcessControl,
    ResumeOutcome, StopReason,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shell redirect appended to the target's arguments to drop its output
const SUPPRESS_REDIRECT: &str = ">/dev/null 2>&1";

/// GDB backend errors
#[derive(Debug, thiserror::Error)]
pub enum GdbError {
    /// gdb could not be started
    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to gdb failed
    #[error("I/O error talking to gdb: {0}")]
    Io(#[from] std::io::Error),

    /// gdb answered `^error`
    #[error("{command}: {message}")]
    Command { command: String, message: String },

    /// gdb's output ended
    #[error("gdb exited")]
    Exited,

    /// No answer within the command timeout
    #[error("gdb did not answer {0} in time")]
    Timeout(String),

    /// An answer that does not fit the command
    #[error("unexpected reply to {command}: {detail}")]
    Protocol { command: String, detail: String },

    /// An operation that needs a loaded executable came first
    #[error("no executable loaded")]
    NoExecutable,
}

impl From<GdbError> for ControlError {
    fn from(e: GdbError) -> Self {
        match e {
            GdbError::Command { command, message } => Self::CommandFailed { command, message },
            GdbError::Protocol { command, detail } => Self::CommandFailed {
                command,
                message: detail,
            },
            GdbError::Timeout(command) => Self::Timeout(command),
            GdbError::NoExecutable => Self::NoProcess,
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// GDB backend configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GdbConfig {
    /// gdb executable
    pub gdb_path: PathBuf,
    /// Bound on every non-resume command
    pub command_timeout: Duration,
    /// Time gdb gets to exit on its own before it is killed
    pub exit_grace: Duration,
}

impl GdbConfig {
    /// Create with defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            gdb_path: PathBuf::from("gdb"),
            command_timeout: Duration::from_secs(10),
            exit_grace: Duration::from_secs(1),
        }
    }

    /// Set gdb path
    #[must_use]
    pub fn with_gdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.gdb_path = path.into();
        self
    }

    /// Set command timeout
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how long gdb may take to exit before it is killed
    #[must_use]
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reply to one command
#[derive(Debug, Default)]
struct Reply {
    results: Vec<(String, MiValue)>,
    console: String,
}

/// A gdb session controlling one target
pub struct GdbBackend {
    config: GdbConfig,
    child: Child,
    stdin: ChildStdin,
    records: mpsc::UnboundedReceiver<MiRecord>,
    reader: JoinHandle<()>,
    next_token: u64,
    stops: VecDeque<Vec<(String, MiValue)>>,
    executable: Option<PathBuf>,
    arguments: Vec<String>,
    policy: ExecutionPolicy,
    terminated: bool,
}

impl GdbBackend {
    /// Start gdb in MI mode
    ///
    /// # Errors
    ///
    /// Returns error if gdb cannot be spawned or rejects the session setup
    pub async fn spawn(config: GdbConfig) -> Result<Self, GdbError> {
        let mut child = Command::new(&config.gdb_path)
            .args(["--interpreter=mi2", "-q", "-nx"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GdbError::Spawn {
                path: config.gdb_path.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(GdbError::Exited)?;
        let stdout = child.stdout.take().ok_or(GdbError::Exited)?;
        let (tx, records) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let record = mi::parse_record(&line).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, line = %line, "unparseable MI record");
                    MiRecord::Unknown(line)
                });
                if tx.send(record).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(gdb = %config.gdb_path.display(), "gdb started");

        let mut backend = Self {
            config,
            child,
            stdin,
            records,
            reader,
            next_token: 1,
            stops: VecDeque::new(),
            executable: None,
            arguments: Vec::new(),
            policy: ExecutionPolicy::default(),
            terminated: false,
        };

        // Interrupting a running target needs gdb to keep reading commands.
        backend.execute("-gdb-set mi-async on").await?;
        backend.execute("-gdb-set confirm off").await?;
        Ok(backend)
    }

    /// Send one command and wait for its result record
    async fn execute(&mut self, command: &str) -> Result<Reply, GdbError> {
        let token = self.next_token;
        self.next_token += 1;

        tracing::trace!(token, command, "gdb <-");
        self.stdin
            .write_all(format!("{}{}\n", token, command).as_bytes())
            .await?;
        self.stdin.flush().await?;

        let deadline = Instant::now() + self.config.command_timeout;
        let mut console = String::new();
        loop {
            let record = tokio::time::timeout_at(deadline, self.records.recv())
                .await
                .map_err(|_| GdbError::Timeout(command.to_string()))?
                .ok_or(GdbError::Exited)?;

            match record {
                MiRecord::Result {
                    token: Some(t),
                    class,
                    results,
                } if t == token => {
                    return match class {
                        ResultClass::Done | ResultClass::Running | ResultClass::Connected => {
                            Ok(Reply { results, console })
                        }
                        ResultClass::Error => Err(GdbError::Command {
                            command: command.to_string(),
                            message: mi::lookup(&results, "msg")
                                .and_then(MiValue::as_str)
                                .unwrap_or("unknown error")
                                .to_string(),
                        }),
                        ResultClass::Exit => Err(GdbError::Exited),
                    };
                }
                MiRecord::Stream {
                    kind: StreamKind::Console,
                    text,
                } => console.push_str(&text),
                other => self.observe(other),
            }
        }
    }

    /// Run a CLI command through the MI console interpreter
    async fn console(&mut self, command: &str) -> Result<Reply, GdbError> {
        self.execute(&format!("-interpreter-exec console {}", mi::quote(command)))
            .await
    }

    /// Record anything that is not the reply being waited for
    fn observe(&mut self, record: MiRecord) {
        match record {
            MiRecord::Async {
                kind: AsyncKind::Exec,
                class,
                results,
                ..
            } if class == "stopped" => {
                tracing::trace!(reason = ?mi::lookup(&results, "reason"), "target stopped");
                self.stops.push_back(results);
            }
            MiRecord::Async {
                kind: AsyncKind::Notify,
                class,
                results,
                ..
            } if class.starts_with("thread-") => {
                tracing::debug!(event = %class, id = ?mi::lookup(&results, "id"), "thread event");
            }
            MiRecord::Stream {
                kind: StreamKind::Log,
                text,
            } => tracing::trace!(text = %text.trim_end(), "gdb log"),
            MiRecord::Unknown(line) => tracing::trace!(line = %line, "non-MI output"),
            _ => {}
        }
    }

    /// Wait for the next `*stopped`, `None` once `timeout` elapses
    async fn wait_for_stop(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Vec<(String, MiValue)>>, GdbError> {
        if let Some(stop) = self.stops.pop_front() {
            return Ok(Some(stop));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let record = match tokio::time::timeout_at(deadline, self.records.recv()).await {
                Ok(Some(record)) => record,
                Ok(None) => return Err(GdbError::Exited),
                Err(_) => return Ok(None),
            };
            self.observe(record);
            if let Some(stop) = self.stops.pop_front() {
                return Ok(Some(stop));
            }
        }
    }

    /// Wait for a stop that must come, e.g. after a step or an interrupt
    async fn expect_stop(&mut self, after: &str) -> Result<StopReason, GdbError> {
        let timeout = self.config.command_timeout;
        self.wait_for_stop(timeout)
            .await?
            .map(|results| stop_reason(&results))
            .ok_or_else(|| GdbError::Timeout(format!("stop after {}", after)))
    }

    /// Settings that take effect only once a process exists
    async fn apply_runtime_policy(&mut self) -> Result<(), GdbError> {
        let policy = self.policy.clone();
        self.execute(&format!(
            "-gdb-set scheduler-locking {}",
            on_off(policy.scheduler_locking)
        ))
        .await?;
        self.execute(&format!(
            "-gdb-set schedule-multiple {}",
            on_off(policy.schedule_multiple)
        ))
        .await?;
        if policy.catch_thread_creation {
            self.console("catch syscall clone").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessControl for GdbBackend {
    async fn load_module(&mut self, path: &Path) -> Result<(), ControlError> {
        let display = path.display().to_string();
        self.execute(&format!("-file-exec-and-symbols {}", mi::quote(&display)))
            .await?;
        self.executable = Some(path.to_path_buf());
        Ok(())
    }

    async fn set_arguments(&mut self, args: &[String]) -> Result<(), ControlError> {
        self.arguments = args.to_vec();
        Ok(())
    }

    async fn set_policy(&mut self, policy: &ExecutionPolicy) -> Result<(), ControlError> {
        let follow_fork = match policy.follow_fork {
            ForkFollow::Parent => "parent",
            ForkFollow::Child => "child",
        };
        let follow_exec = match policy.follow_exec {
            ExecFollow::NewImage => "new",
            ExecFollow::SameInferior => "same",
        };

        for command in [
            "-gdb-set startup-with-shell on".to_string(),
            "-gdb-set non-stop off".to_string(),
            format!("-gdb-set follow-fork-mode {}", follow_fork),
            format!(
                "-gdb-set detach-on-fork {}",
                on_off(!policy.keep_fork_attached)
            ),
            format!("-gdb-set follow-exec-mode {}", follow_exec),
            "-gdb-set print finish off".to_string(),
            "-gdb-set pagination off".to_string(),
        ] {
            self.execute(&command).await?;
        }

        self.policy = policy.clone();
        Ok(())
    }

    async fn start_process(&mut self) -> Result<(), ControlError> {
        if self.executable.is_none() {
            return Err(GdbError::NoExecutable.into());
        }

        let args = command_line(&self.arguments, self.policy.suppress_output);
        self.console(&format!("set args {}", args)).await?;
        self.console("starti").await?;
        let reason = self.expect_stop("starti").await?;
        tracing::debug!(?reason, "target started");

        self.apply_runtime_policy().await?;
        Ok(())
    }

    async fn resolve_module_base(&mut self) -> Result<Option<Address>, ControlError> {
        let Some(executable) = self.executable.clone() else {
            return Ok(None);
        };
        let reply = match self.console("info proc mappings").await {
            Ok(reply) => reply,
            Err(GdbError::Command { message, .. }) => {
                tracing::debug!(message = %message, "cannot list mappings");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(mappings::module_base(&reply.console, &executable))
    }

    async fn set_temporary_breakpoint(
        &mut self,
        address: Address,
    ) -> Result<BreakpointHandle, ControlError> {
        let command = format!("-break-insert -t *{:#x}", address);
        let reply = self.execute(&command).await?;
        let number = mi::lookup(&reply.results, "bkpt")
            .and_then(|b| b.get("number"))
            .and_then(MiValue::as_str)
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| GdbError::Protocol {
                command: command.clone(),
                detail: "missing breakpoint number".to_string(),
            })?;
        Ok(BreakpointHandle::from_raw(number))
    }

    async fn switch_active_thread(&mut self, thread: ThreadId) -> Result<bool, ControlError> {
        match self.execute(&format!("-thread-select {}", thread)).await {
            Ok(_) => Ok(true),
            Err(GdbError::Command { message, .. }) => {
                tracing::debug!(%thread, message = %message, "thread select rejected");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resume_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<ResumeOutcome, ControlError> {
        if !self.stops.is_empty() {
            tracing::debug!(stale = self.stops.len(), "discarding stale stops");
            self.stops.clear();
        }

        self.execute("-exec-continue").await?;
        if let Some(results) = self.wait_for_stop(timeout).await? {
            return Ok(ResumeOutcome::Stopped(stop_reason(&results)));
        }

        // The stop that follows an interrupt can still be the breakpoint if
        // the thread got there in the meantime.
        match self.execute("-exec-interrupt").await {
            Ok(_) => {}
            Err(GdbError::Command { message, .. }) => {
                tracing::debug!(message = %message, "interrupt rejected");
            }
            Err(e) => return Err(e.into()),
        }
        match self.expect_stop("-exec-interrupt").await? {
            StopReason::Breakpoint => Ok(ResumeOutcome::Stopped(StopReason::Breakpoint)),
            _ => Ok(ResumeOutcome::TimedOut),
        }
    }

    async fn single_step(&mut self) -> Result<(), ControlError> {
        self.execute("-exec-step-instruction").await?;
        self.expect_stop("-exec-step-instruction").await?;
        Ok(())
    }

    async fn current_frame_name(&mut self) -> Result<Option<String>, ControlError> {
        match self.execute("-stack-info-frame").await {
            Ok(reply) => Ok(mi::lookup(&reply.results, "frame")
                .and_then(|f| f.get("func"))
                .and_then(MiValue::as_str)
                .map(str::to_string)),
            Err(GdbError::Command { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_breakpoint(&mut self, handle: BreakpointHandle) -> Result<(), ControlError> {
        // A temporary breakpoint that was hit is already gone.
        match self
            .execute(&format!("-break-delete {}", handle.as_u64()))
            .await
        {
            Ok(_) | Err(GdbError::Command { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn terminate(&mut self) -> Result<(), ControlError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if let Err(e) = self.console("kill").await {
            tracing::debug!(error = %e, "kill before exit failed");
        }
        let _ = self.stdin.write_all(b"-gdb-exit\n").await;
        let _ = self.stdin.flush().await;

        match tokio::time::timeout(self.config.exit_grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "gdb exited"),
            _ => {
                tracing::warn!("gdb did not exit, killing it");
                self.child
                    .kill()
                    .await
                    .map_err(|e| ControlError::Unavailable(e.to_string()))?;
            }
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for GdbBackend {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Map a `*stopped` record to a stop reason
fn stop_reason(results: &[(String, MiValue)]) -> StopReason {
    let reason = mi::lookup(results, "reason").and_then(MiValue::as_str);
    match reason {
        Some("breakpoint-hit") => StopReason::Breakpoint,
        Some("syscall-entry" | "syscall-return") => StopReason::SyscallEntry,
        Some("signal-received") => StopReason::Signal(
            mi::lookup(results, "signal-name")
                .and_then(MiValue::as_str)
                .unwrap_or("unknown")
                .to_string(),
        ),
        Some("exited" | "exited-normally" | "exited-signalled") => StopReason::Exited,
        Some(other) => StopReason::Other(other.to_string()),
        None => StopReason::Other("unspecified".to_string()),
    }
}

/// Quote one argument for `/bin/sh`
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_@%+=:,./-".contains(&b));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Target command line as gdb's startup shell sees it
fn command_line(args: &[String], suppress_output: bool) -> String {
    let mut parts: Vec<String> = args.iter().map(|a| shell_quote(a)).collect();
    if suppress_output {
        parts.push(SUPPRESS_REDIRECT.to_string());
    }
    parts.join(" ")
}
