//! One supervised replay session.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::supervise::{Termination, supervise};
use racereplay_core::CONFIG_PATH_ENV;
use racereplay_replay::{Outcome, ReportMode, STAT_PATH_ENV};
use std::process::Stdio;
use tokio::process::Command;

/// Artifact file name inside the session's scratch directory
pub const ARTIFACT_FILE_NAME: &str = "rb_stat";

/// Result of one harness run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessRun {
    /// How the controller ended
    pub termination: Termination,
    /// Report read from the artifact
    pub outcome: Outcome,
}

/// Runs replay sessions
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    /// Create a harness
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one session and report in `mode`
    ///
    /// The artifact lives in a fresh scratch directory, so nothing from an
    /// earlier run can be mistaken for this one. A session that times out is
    /// reported from whatever the target managed to write.
    ///
    /// # Errors
    ///
    /// Returns error if the controller cannot be started or supervised
    pub async fn run(&self, mode: ReportMode) -> HarnessResult<HarnessRun> {
        let config_path = std::path::absolute(&self.config.config_path)
            .map_err(|e| HarnessError::io(&self.config.config_path, e))?;

        let scratch = tempfile::Builder::new()
            .prefix("repro-")
            .tempdir()
            .map_err(|e| HarnessError::io(std::env::temp_dir(), e))?;
        let artifact = scratch.path().join(ARTIFACT_FILE_NAME);

        let controller = &self.config.controller;
        let mut command = Command::new(&controller.program);
        command
            .args(&controller.args)
            .env(CONFIG_PATH_ENV, &config_path)
            .env(STAT_PATH_ENV, &artifact)
            .stdin(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        tracing::info!(
            config = %config_path.display(),
            timeout = ?self.config.timeout,
            "starting replay session"
        );
        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            program: controller.program.clone(),
            source,
        })?;

        let termination =
            supervise(&mut child, self.config.timeout, self.config.kill_grace).await?;
        match termination {
            Termination::Exited(status) => {
                tracing::debug!(%status, "controller exited");
            }
            other => tracing::warn!(termination = ?other, "session did not finish"),
        }

        let outcome = Outcome::collect(mode, &artifact);
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "failed to remove scratch directory");
        }

        tracing::info!(?outcome, "replay session finished");
        Ok(HarnessRun {
            termination,
            outcome,
        })
    }
}
