//! Harness configuration.

use crate::error::HarnessResult;
use racereplay_core::SessionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Time the controller gets to exit after a graceful termination request
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Program and arguments that start a controller process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerCommand {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments passed to it
    pub args: Vec<String>,
}

impl ControllerCommand {
    /// Create a command without arguments
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Everything the harness needs to run one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Session config handed to the controller through the environment
    pub config_path: PathBuf,
    /// Controller to launch
    pub controller: ControllerCommand,
    /// Whole-session timeout, unbounded when `None`
    pub timeout: Option<Duration>,
    /// Controller working directory, inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Grace period between terminate and kill
    pub kill_grace: Duration,
}

impl HarnessConfig {
    /// Create with no timeout and the inherited working directory
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, controller: ControllerCommand) -> Self {
        Self {
            config_path: config_path.into(),
            controller,
            timeout: None,
            cwd: None,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Take timeout and working directory from an already parsed session
    #[must_use]
    pub fn from_session(
        config_path: impl Into<PathBuf>,
        session: &SessionConfig,
        controller: ControllerCommand,
    ) -> Self {
        let mut config = Self::new(config_path, controller);
        config.timeout = session.session_timeout();
        config.cwd = session.cwd.clone();
        config
    }

    /// Read the session config at `config_path`
    ///
    /// # Errors
    ///
    /// Returns error if the session config cannot be loaded or is invalid
    pub fn load(config_path: impl AsRef<Path>, controller: ControllerCommand) -> HarnessResult<Self> {
        let config_path = config_path.as_ref();
        let session = SessionConfig::load(config_path)?;
        Ok(Self::from_session(config_path, &session, controller))
    }

    /// Set whole-session timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set grace period
    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_controller_command() {
        let cmd = ControllerCommand::new("/usr/bin/racereplay")
            .with_args(["--gdb", "/opt/gdb"])
            .with_arg("controller");
        assert_eq!(cmd.program, PathBuf::from("/usr/bin/racereplay"));
        assert_eq!(cmd.args, vec!["--gdb", "/opt/gdb", "controller"]);
    }

    #[test]
    fn test_from_session() {
        let session = SessionConfig::new(vec!["./a".to_string()], "trace")
            .with_timeout(2.5)
            .with_cwd("/work");
        let config =
            HarnessConfig::from_session("config.json", &session, ControllerCommand::new("c"));
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.cwd, Some(PathBuf::from("/work")));
        assert_eq!(config.kill_grace, DEFAULT_KILL_GRACE);
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"cmd": ["./bench"], "trace": "t", "timeout": 3}"#).unwrap();

        let config = HarnessConfig::load(&path, ControllerCommand::new("c")).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.cwd, None);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_load_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"trace": "t"}"#).unwrap();

        let err = HarnessConfig::load(&path, ControllerCommand::new("c")).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_builders() {
        let config = HarnessConfig::new("c.json", ControllerCommand::new("c"))
            .with_timeout(Some(Duration::from_secs(1)))
            .with_cwd("/tmp")
            .with_kill_grace(Duration::from_millis(100));
        assert_eq!(config.timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.kill_grace, Duration::from_millis(100));
    }
}
