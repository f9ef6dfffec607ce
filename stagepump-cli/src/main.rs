//! Stagepump CLI - Command-line interface
//!
//! Drives the stagepump library end to end: files are fetched and hashed on
//! the pump's worker threads and finalized on the main thread.

mod digest;
mod error;

use std::io;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use stagepump::logging::{init_logging, LoggingGuard};
use stagepump::{PumpConfig, ThreadCount};

use crate::digest::DigestOptions;
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "stagepump")]
#[command(version, about = "Multi-stage fetch/transform/finalize work pump", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 digest of each file
    Digest {
        /// Number of fetch (file read) threads, 0 for the default
        #[arg(long)]
        fetch_threads: Option<usize>,

        /// Number of transform (hash) threads, 0 for one per CPU
        #[arg(long)]
        transform_threads: Option<usize>,

        /// Pump configuration file (INI, [pump] section)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum results finalized per drain pass
        #[arg(long, default_value = "16")]
        batch: usize,

        /// Also write logs to this file (cleared on start)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Digest {
            fetch_threads,
            transform_threads,
            config,
            batch,
            log_file,
            files,
        } => run_digest(
            fetch_threads,
            transform_threads,
            config,
            batch,
            log_file,
            files,
        ),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => e.exit(),
    }
}

/// Returns whether every file was hashed.
fn run_digest(
    fetch_threads: Option<usize>,
    transform_threads: Option<usize>,
    config_path: Option<PathBuf>,
    batch: usize,
    log_file: Option<PathBuf>,
    files: Vec<PathBuf>,
) -> Result<bool, CliError> {
    let _logging: LoggingGuard = init_logging(log_file.as_deref()).map_err(CliError::LoggingInit)?;

    let mut config = match &config_path {
        Some(path) => PumpConfig::load_from(path)?,
        None => PumpConfig::load()?,
    };
    if let Some(count) = fetch_threads {
        config.fetch_threads = ThreadCount::from(count);
    }
    if let Some(count) = transform_threads {
        config.transform_threads = ThreadCount::from(count);
    }

    let interrupted = digest::interrupt_flag()?;
    let options = DigestOptions {
        files,
        config,
        batch,
    };

    let summary = digest::run(
        &options,
        &interrupted,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )?;
    Ok(summary.is_clean())
}
