//! RACEREPLAY harness
//!
//! Runs one replay session in a child controller process under a
//! whole-session timeout, then turns the race-statistics artifact the target
//! left behind into a report.
//!
//! # Example
//!
//! ```ignore
//! use racereplay_harness::{ControllerCommand, Harness, HarnessConfig};
//! use racereplay_replay::ReportMode;
//!
//! let controller = ControllerCommand::new("racereplay").with_arg("controller");
//! let config = HarnessConfig::load("config.json", controller)?;
//! let run = Harness::new(config).run(ReportMode::Verdict).await?;
//! println!("reproduced: {}", run.outcome.reproduced());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod output;
pub mod runner;
pub mod supervise;

pub use config::{ControllerCommand, DEFAULT_KILL_GRACE, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use output::{remove_stale, write_enumeration};
pub use runner::{ARTIFACT_FILE_NAME, Harness, HarnessRun};
pub use supervise::{Termination, supervise};
