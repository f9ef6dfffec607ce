//! Pump configuration.
//!
//! [`PumpConfig`] decides how many fetch and transform workers a pump runs and
//! how their threads are named. It can be built in code or loaded from an INI
//! file:
//!
//! ```ini
//! [pump]
//! fetch_threads = 2
//! transform_threads = auto
//! thread_name_prefix = loader
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::error::PumpError;
use crate::worker::WorkerRole;

/// Thread counts must stay below this bound.
pub const MAX_THREADS: usize = 1024;

/// Fetch workers used when the count is [`ThreadCount::Auto`].
pub const DEFAULT_FETCH_THREADS: usize = 1;

/// Thread name prefix used when none is configured.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "stagepump";

/// INI section holding pump settings.
const SECTION: &str = "pump";

/// A requested worker count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadCount {
    /// Let the pump choose: one fetch worker, one transform worker per CPU.
    #[default]
    Auto,
    /// Exactly this many workers.
    Exact(usize),
}

impl ThreadCount {
    fn resolve(self, role: WorkerRole) -> Result<usize, PumpError> {
        let count = match self {
            ThreadCount::Auto => match role {
                WorkerRole::Fetch => DEFAULT_FETCH_THREADS,
                WorkerRole::Transform => std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    .min(MAX_THREADS - 1),
            },
            ThreadCount::Exact(n) => n,
        };

        if count == 0 || count >= MAX_THREADS {
            return Err(PumpError::InvalidThreadCount {
                role,
                requested: count,
                limit: MAX_THREADS,
            });
        }
        Ok(count)
    }
}

/// `0` is the "use the default" sentinel.
impl From<usize> for ThreadCount {
    fn from(count: usize) -> Self {
        match count {
            0 => ThreadCount::Auto,
            n => ThreadCount::Exact(n),
        }
    }
}

impl FromStr for ThreadCount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ThreadCount::Auto);
        }
        s.parse::<usize>().map(ThreadCount::from)
    }
}

impl fmt::Display for ThreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadCount::Auto => f.write_str("auto"),
            ThreadCount::Exact(n) => write!(f, "{}", n),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the config file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// A key holds a value that cannot be used.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Worker pool configuration for a [`Pump`](crate::Pump).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// Number of fetch workers.
    pub fetch_threads: ThreadCount,

    /// Number of transform workers.
    pub transform_threads: ThreadCount,

    /// Worker threads are named `{prefix}-fetch-{i}` and `{prefix}-transform-{i}`.
    pub thread_name_prefix: String,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            fetch_threads: ThreadCount::Auto,
            transform_threads: ThreadCount::Auto,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

/// Worker counts after defaults are applied and bounds are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedThreads {
    pub fetch: usize,
    pub transform: usize,
}

impl PumpConfig {
    /// Creates a config with explicit worker counts; `0` selects the default.
    pub fn new(fetch_threads: usize, transform_threads: usize) -> Self {
        Self {
            fetch_threads: fetch_threads.into(),
            transform_threads: transform_threads.into(),
            ..Self::default()
        }
    }

    /// Set the fetch worker count.
    pub fn with_fetch_threads(mut self, count: impl Into<ThreadCount>) -> Self {
        self.fetch_threads = count.into();
        self
    }

    /// Set the transform worker count.
    pub fn with_transform_threads(mut self, count: impl Into<ThreadCount>) -> Self {
        self.transform_threads = count.into();
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Applies defaults and validates both counts.
    pub fn resolve(&self) -> Result<ResolvedThreads, PumpError> {
        Ok(ResolvedThreads {
            fetch: self.fetch_threads.resolve(WorkerRole::Fetch)?,
            transform: self.transform_threads.resolve(WorkerRole::Transform)?,
        })
    }

    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&default_config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Build a config from parsed INI content, overlaying defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let Some(section) = ini.section(Some(SECTION)) else {
            return Ok(config);
        };

        if let Some(v) = section.get("fetch_threads") {
            config.fetch_threads = parse_thread_count("fetch_threads", v)?;
        }
        if let Some(v) = section.get("transform_threads") {
            config.transform_threads = parse_thread_count("transform_threads", v)?;
        }
        if let Some(v) = section.get("thread_name_prefix") {
            let v = v.trim();
            if !v.is_empty() {
                config.thread_name_prefix = v.to_string();
            }
        }

        Ok(config)
    }
}

fn parse_thread_count(key: &str, value: &str) -> Result<ThreadCount, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        section: SECTION.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let count: ThreadCount = value
        .parse()
        .map_err(|_| invalid("expected a number or 'auto'"))?;
    if let ThreadCount::Exact(n) = count {
        if n >= MAX_THREADS {
            return Err(invalid(&format!("must be below {}", MAX_THREADS)));
        }
    }
    Ok(count)
}

/// Get the path to the config directory (`<config dir>/stagepump`).
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagepump")
}

/// Get the path to the config file (`<config dir>/stagepump/pump.ini`).
pub fn default_config_path() -> PathBuf {
    config_directory().join("pump.ini")
}
