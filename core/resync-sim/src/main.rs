//! resync-sim: replays timed stream scenarios through the resync core.
//!
//! Feeds a JSON-lines file of transport callbacks, lifecycle signals, and
//! ticks into a `SyncEngine` wired to a recording transport, and prints one
//! JSON report per step on stdout. Logs go to stderr.
//!
//! ## Subcommands
//!
//! - `replay`: Run a scenario file (`-` reads stdin)
//! - `defaults`: Print the effective configuration as JSON

mod logging;
mod scenario;

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use resync_core::{load_config, SyncConfig, SyncError};

#[derive(Parser)]
#[command(name = "resync-sim")]
#[command(about = "Replay stream resynchronization scenarios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines scenario and print one report per step
    Replay {
        /// Scenario file, or `-` for stdin
        #[arg(value_name = "SCENARIO")]
        scenario: PathBuf,

        /// Config file (defaults to <config_dir>/resync/resync.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Also write logs to a daily rolling file in this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Print the effective configuration
    Defaults {
        /// Config file to merge over the defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] SyncError),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("Scenario line {line} is not a valid step: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Report for line {line} could not be encoded: {source}")]
    Encode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Scenario line {line} is out of the clock's range ({at_ms}ms)")]
    TimeOutOfRange { line: usize, at_ms: u64 },

    #[error("Scenario line {line} goes back in time ({at_ms}ms after {previous}ms)")]
    TimeWentBackwards {
        line: usize,
        at_ms: u64,
        previous: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_dir = match &cli.command {
        Commands::Replay { log_dir, .. } => log_dir.clone(),
        Commands::Defaults { .. } => None,
    };
    let _logging_guard = logging::init(log_dir.as_deref());

    match cli.command {
        Commands::Replay {
            scenario, config, ..
        } => {
            if let Err(e) = run_replay(&scenario, config) {
                tracing::error!(error = %e, "resync-sim replay failed");
                std::process::exit(1);
            }
        }
        Commands::Defaults { config } => {
            if let Err(e) = print_config(config) {
                tracing::error!(error = %e, "resync-sim defaults failed");
                std::process::exit(1);
            }
        }
    }
}

fn run_replay(path: &Path, config: Option<PathBuf>) -> Result<(), SimError> {
    let config = load_config(config)?;
    let stdout = io::stdout().lock();

    let runner = if path.as_os_str() == "-" {
        scenario::replay(config, io::stdin().lock(), stdout)?
    } else {
        let file = fs_err::File::open(path).map_err(SimError::Io)?;
        scenario::replay(config, BufReader::new(file), stdout)?
    };

    let snapshot = runner.engine().snapshot();
    tracing::info!(
        global = ?snapshot.global.status,
        cursor = snapshot.global.cursor,
        terminals = snapshot.terminals.len(),
        gaps = snapshot.router.gaps,
        "Scenario complete"
    );
    Ok(())
}

fn print_config(path: Option<PathBuf>) -> Result<(), SimError> {
    let config: SyncConfig = load_config(path)?;
    let rendered = serde_json::to_string_pretty(&config).map_err(|source| SimError::Encode {
        line: 0,
        source,
    })?;
    println!("{}", rendered);
    Ok(())
}
