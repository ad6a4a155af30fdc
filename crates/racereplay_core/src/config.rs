//! Session configuration.
//!
//! One JSON document describes one replay session. It is read twice: by the
//! harness (for `timeout` and `cwd`) and by the controller process, which
//! finds it through the `REPRO_CONFIG` environment variable.

use crate::error::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the absolute config path into the controller
pub const CONFIG_PATH_ENV: &str = "REPRO_CONFIG";

/// Default per-checkpoint step timeout in seconds
pub const DEFAULT_STEP_TIMEOUT_SECS: f64 = 0.5;

fn default_step_timeout() -> f64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

/// Replay session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Executable path followed by its arguments
    pub cmd: Vec<String>,
    /// Path to the checkpoint trace
    pub trace: PathBuf,
    /// Per-checkpoint step timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout: f64,
    /// Whole-session timeout in seconds (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Working directory for the controller and its target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Keys this crate does not recognise, kept for other tooling
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl SessionConfig {
    /// Create a config with defaults for every optional field
    #[must_use]
    pub fn new(cmd: Vec<String>, trace: impl Into<PathBuf>) -> Self {
        Self {
            cmd,
            trace: trace.into(),
            step_timeout: DEFAULT_STEP_TIMEOUT_SECS,
            timeout: None,
            cwd: None,
            extra: IndexMap::new(),
        }
    }

    /// Set step timeout
    #[must_use]
    pub fn with_step_timeout(mut self, secs: f64) -> Self {
        self.step_timeout = secs;
        self
    }

    /// Set whole-session timeout
    #[must_use]
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Set working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Load and validate a config file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, lacks a
    /// required field, or fails [`SessionConfig::validate`]
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        Self::from_json(&text)
    }

    /// Parse and validate a config document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or invalid
    pub fn from_json(text: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        for key in config.extra.keys() {
            tracing::warn!(key = %key, "ignoring unrecognised session config key");
        }
        Ok(config)
    }

    /// Check field invariants
    ///
    /// # Errors
    ///
    /// Returns error if `cmd` is empty or a timeout is not a positive,
    /// finite number of seconds
    pub fn validate(&self) -> CoreResult<()> {
        if self.cmd.is_empty() || self.cmd[0].is_empty() {
            return Err(CoreError::Validation {
                field: "cmd".to_string(),
                reason: "must name an executable".to_string(),
            });
        }
        check_seconds("step_timeout", self.step_timeout)?;
        if let Some(timeout) = self.timeout {
            check_seconds("timeout", timeout)?;
        }
        Ok(())
    }

    /// Target executable
    #[must_use]
    pub fn executable(&self) -> &str {
        self.cmd.first().map(String::as_str).unwrap_or_default()
    }

    /// Arguments forwarded to the target
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        self.cmd.get(1..).unwrap_or_default()
    }

    /// Step timeout as a duration
    #[must_use]
    pub fn step_timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.step_timeout)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_STEP_TIMEOUT_SECS))
    }

    /// Whole-session timeout as a duration
    #[must_use]
    pub fn session_timeout(&self) -> Option<Duration> {
        self.timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

fn check_seconds(field: &str, secs: f64) -> CoreResult<()> {
    if secs.is_finite() && secs > 0.0 {
        Ok(())
    } else {
        Err(CoreError::Validation {
            field: field.to_string(),
            reason: format!("must be a positive number of seconds, got {}", secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = SessionConfig::from_json(
            r#"{"cmd": ["./bench", "-t", "4"], "trace": "trace.txt"}"#,
        )
        .unwrap();
        assert_eq!(config.executable(), "./bench");
        assert_eq!(config.arguments(), ["-t", "4"]);
        assert_eq!(config.step_timeout, DEFAULT_STEP_TIMEOUT_SECS);
        assert_eq!(config.step_timeout_duration(), Duration::from_millis(500));
        assert_eq!(config.session_timeout(), None);
        assert_eq!(config.cwd, None);
    }

    #[test]
    fn test_all_options() {
        let config = SessionConfig::from_json(
            r#"{"cmd": ["/bin/app"], "trace": "/t", "step_timeout": 2,
                "timeout": 30.5, "cwd": "/work"}"#,
        )
        .unwrap();
        assert_eq!(config.step_timeout_duration(), Duration::from_secs(2));
        assert_eq!(config.session_timeout(), Some(Duration::from_secs_f64(30.5)));
        assert_eq!(config.cwd, Some(PathBuf::from("/work")));
        assert!(config.arguments().is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let err = SessionConfig::from_json(r#"{"cmd": ["/bin/app"]}"#).unwrap_err();
        match err {
            CoreError::ParseError { message } => assert!(message.contains("trace")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_cmd_rejected() {
        let err = SessionConfig::from_json(r#"{"cmd": [], "trace": "t"}"#).unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "cmd"));
    }

    #[test]
    fn test_bad_timeouts_rejected() {
        let err = SessionConfig::from_json(r#"{"cmd": ["a"], "trace": "t", "step_timeout": 0}"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "step_timeout"));

        let err = SessionConfig::from_json(r#"{"cmd": ["a"], "trace": "t", "timeout": -1}"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref field, .. } if field == "timeout"));
    }

    #[test]
    fn test_unknown_keys_retained() {
        let config = SessionConfig::from_json(
            r#"{"cmd": ["a"], "trace": "t", "bug_id": 12, "note": "x"}"#,
        )
        .unwrap();
        assert_eq!(config.extra.len(), 2);
        assert_eq!(config.extra.get("bug_id"), Some(&serde_json::json!(12)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cmd": ["./a.out"], "trace": "trace"}"#).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config, SessionConfig::new(vec!["./a.out".to_string()], "trace"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::new(vec!["a".to_string()], "t")
            .with_step_timeout(1.5)
            .with_timeout(10.0)
            .with_cwd("/tmp");
        assert!(config.validate().is_ok());
        assert_eq!(config.step_timeout, 1.5);
        assert_eq!(config.timeout, Some(10.0));
    }
}
