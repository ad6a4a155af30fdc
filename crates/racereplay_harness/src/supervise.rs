//! Controller supervision.
//!
//! The controller runs as the leader of its own process group, so the
//! debugger and the target it spawned receive the same signals. On timeout
//! the group is asked to terminate, then killed once the grace period is
//! over.

use crate::error::{HarnessError, HarnessResult};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;

/// How the controller process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own
    Exited(ExitStatus),
    /// Ended after the termination request
    Terminated,
    /// Still alive after the grace period and killed
    Killed,
}

impl Termination {
    /// Whether the session hit its timeout
    #[must_use]
    pub fn timed_out(&self) -> bool {
        !matches!(self, Self::Exited(_))
    }
}

/// Wait for `child`, escalating to terminate then kill once `timeout` passes
///
/// # Errors
///
/// Returns error if waiting on or signalling the child fails
pub async fn supervise(
    child: &mut Child,
    timeout: Option<Duration>,
    grace: Duration,
) -> HarnessResult<Termination> {
    let Some(timeout) = timeout else {
        let status = child.wait().await.map_err(HarnessError::Supervise)?;
        return Ok(Termination::Exited(status));
    };

    if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
        return Ok(Termination::Exited(status.map_err(HarnessError::Supervise)?));
    }

    tracing::warn!(timeout = ?timeout, "session timed out, terminating controller");
    signal_group(child, libc::SIGTERM)?;

    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        status.map_err(HarnessError::Supervise)?;
        return Ok(Termination::Terminated);
    }

    tracing::warn!(grace = ?grace, "controller ignored termination, killing it");
    signal_group(child, libc::SIGKILL)?;
    child.kill().await.map_err(HarnessError::Supervise)?;
    Ok(Termination::Killed)
}

/// Send `signal` to the process group led by `child`
fn signal_group(child: &Child, signal: libc::c_int) -> HarnessResult<()> {
    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pgid = libc::pid_t::try_from(pid).map_err(|_| {
        HarnessError::Supervise(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("pid {} out of range", pid),
        ))
    })?;

    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(HarnessError::Supervise(err));
        }
    }
    Ok(())
}
