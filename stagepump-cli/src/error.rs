//! CLI error handling with user-friendly messages.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process;

use stagepump::{ConfigError, PumpError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(io::Error),
    /// Configuration file could not be used
    Config(ConfigError),
    /// Pump could not be created
    PumpCreation(PumpError),
    /// A job could not be submitted
    Submit { path: PathBuf, error: PumpError },
    /// Ctrl-C handler could not be installed
    Signal(String),
    /// Results could not be written
    Output(io::Error),
    /// Nothing to do
    NoInput,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::PumpCreation(PumpError::InvalidThreadCount { .. }) = self {
            eprintln!();
            eprintln!("Use 0 (or 'auto' in the config file) for the default thread count.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::PumpCreation(e) => write!(f, "Failed to start pump: {}", e),
            CliError::Submit { path, error } => {
                write!(f, "Failed to queue '{}': {}", path.display(), error)
            }
            CliError::Signal(msg) => write!(f, "Failed to install Ctrl-C handler: {}", msg),
            CliError::Output(e) => write!(f, "Failed to write output: {}", e),
            CliError::NoInput => write!(f, "No input files given"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::PumpCreation(e) => Some(e),
            CliError::Submit { error, .. } => Some(error),
            CliError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<PumpError> for CliError {
    fn from(e: PumpError) -> Self {
        CliError::PumpCreation(e)
    }
}
