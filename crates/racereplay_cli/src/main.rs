//! RACEREPLAY CLI
//!
//! `repro` and `verify` run one supervised replay session each; the session
//! itself is this binary again, started as `racereplay controller` with its
//! config path in the environment.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::eyre::{WrapErr, eyre};
use color_eyre::Result;
use racereplay_core::{CONFIG_PATH_ENV, SessionConfig};
use racereplay_gdb::{GdbBackend, GdbConfig};
use racereplay_harness::{
    ControllerCommand, Harness, HarnessConfig, HarnessRun, remove_stale, write_enumeration,
};
use racereplay_replay::{
    RaceStatistics, ReplayConfig, ReplayController, ReportMode, TargetSpec, Trace,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "racereplay=info";

/// Controller exit status for a failed replay
const CONTROLLER_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "racereplay")]
#[command(about = "RACEREPLAY - Deterministic thread-interleaving replay for data races", long_about = None)]
#[command(version)]
struct Cli {
    /// Debugger executable driven by the controller
    #[arg(long, global = true, default_value = "gdb")]
    gdb: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a session and write the triggered race indices as JSON
    Repro {
        /// Session config
        config: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// Replay a session; exit 0 only if a race reproduced
    Verify {
        /// Session config
        config: PathBuf,
    },
    /// Run the replay controller for the config named by REPRO_CONFIG
    #[command(hide = true)]
    Controller,
    /// Print the schedule parsed from a trace file
    ParseTrace {
        /// Trace file
        trace: PathBuf,
    },
    /// Print triggered indices from a race statistics artifact
    Stats {
        /// Artifact file
        artifact: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Repro { config, output } => cmd_repro(&cli.gdb, &config, &output).await,
        Commands::Verify { config } => cmd_verify(&cli.gdb, &config).await,
        Commands::Controller => cmd_controller(cli.gdb).await,
        Commands::ParseTrace { trace } => cmd_parse_trace(&trace),
        Commands::Stats { artifact } => cmd_stats(&artifact),
    }
}

/// This binary, started in controller mode
fn controller_command(gdb: &Path) -> Result<ControllerCommand> {
    let exe = std::env::current_exe().wrap_err("cannot locate racereplay executable")?;
    Ok(ControllerCommand::new(exe)
        .with_args(["--gdb".to_string(), gdb.display().to_string()])
        .with_arg("controller"))
}

async fn run_session(gdb: &Path, config: &Path, mode: ReportMode) -> Result<HarnessRun> {
    let harness_config = HarnessConfig::load(config, controller_command(gdb)?)?;
    let run = Harness::new(harness_config).run(mode).await?;
    Ok(run)
}

async fn cmd_repro(gdb: &Path, config: &Path, output: &Path) -> Result<ExitCode> {
    remove_stale(output)?;
    let run = run_session(gdb, config, ReportMode::Enumerate).await?;
    write_enumeration(output, &run.outcome)?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_verify(gdb: &Path, config: &Path) -> Result<ExitCode> {
    let run = run_session(gdb, config, ReportMode::Verdict).await?;
    if run.outcome.reproduced() {
        println!("race reproduced");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("race not reproduced");
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_controller(gdb: PathBuf) -> Result<ExitCode> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .ok_or_else(|| eyre!("{} is not set", CONFIG_PATH_ENV))?;
    let session = SessionConfig::load(&config_path)?;
    let trace = Trace::parse(&session.trace)?;
    tracing::info!(
        trace = %session.trace.display(),
        checkpoints = trace.len(),
        "loaded trace"
    );

    let backend = GdbBackend::spawn(GdbConfig::new().with_gdb_path(gdb)).await?;
    let mut controller = ReplayController::new(backend, trace, TargetSpec::from_config(&session))
        .with_config(ReplayConfig::from_session(&session));

    let report = controller.run().await;
    tracing::debug!(report = %serde_json::to_string(&report)?, "replay report");

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(CONTROLLER_FAILED))
    }
}

fn cmd_parse_trace(path: &Path) -> Result<ExitCode> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read trace {}", path.display()))?;
    let (trace, malformed) = Trace::from_text_with_warnings(&text);

    for (index, checkpoint) in trace.iter().enumerate() {
        println!("{:>6}  {}", index, checkpoint);
    }
    for line in &malformed {
        eprintln!("line {}: {}: {:?}", line.line, line.error, line.text);
    }
    eprintln!(
        "{} checkpoints, {} malformed lines",
        trace.len(),
        malformed.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_stats(path: &Path) -> Result<ExitCode> {
    let stats = RaceStatistics::load(path)?.unwrap_or_else(|| {
        tracing::warn!(path = %path.display(), "no race statistics artifact");
        RaceStatistics::default()
    });
    println!("{}", serde_json::to_string(&stats.triggered())?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_gdb_flag() {
        let cli = Cli::parse_from(["racereplay", "--gdb", "/opt/gdb", "controller"]);
        assert_eq!(cli.gdb, PathBuf::from("/opt/gdb"));
        assert!(matches!(cli.command, Commands::Controller));

        let cli = Cli::parse_from(["racereplay", "verify", "c.json"]);
        assert_eq!(cli.gdb, PathBuf::from("gdb"));
        assert!(matches!(cli.command, Commands::Verify { .. }));
    }

    #[test]
    fn test_repro_arguments() {
        let cli = Cli::parse_from(["racereplay", "repro", "config.json", "out.json"]);
        match cli.command {
            Commands::Repro { config, output } => {
                assert_eq!(config, PathBuf::from("config.json"));
                assert_eq!(output, PathBuf::from("out.json"));
            }
            _ => panic!("expected repro"),
        }
    }

    #[test]
    fn test_controller_command_carries_gdb() {
        let cmd = controller_command(Path::new("/opt/gdb")).unwrap();
        assert_eq!(cmd.args, vec!["--gdb", "/opt/gdb", "controller"]);
    }
}
