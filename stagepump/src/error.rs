//! Error types for the stage pump.
//!
//! Two families of errors exist:
//!
//! - [`StageError`]: reported by a Fetcher or Transformer. These never escape
//!   the thread that detected them; they reach the caller only through a job's
//!   [`ResultSlot`](crate::ResultSlot) as part of a [`JobStatus`](crate::JobStatus).
//! - [`PumpError`]: returned synchronously from pump creation and submission.

use std::collections::TryReserveError;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::worker::WorkerRole;

/// Errors a Fetcher or Transformer can report for a single job.
///
/// Stage errors are `Clone` so that a job status can be read from a result
/// slot any number of times.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The payload or staged state was requested before it was produced.
    #[error("Payload not available")]
    NotReady,

    /// I/O error while obtaining the payload.
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },

    /// The payload could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Generic collaborator failure.
    #[error("{0}")]
    Failed(String),

    /// The collaborator panicked; the panic was contained by the pump.
    #[error("Stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Creates a generic failure with the given message.
    pub fn failed(msg: impl Into<String>) -> Self {
        StageError::Failed(msg.into())
    }

    /// Creates an invalid-data failure with the given message.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        StageError::InvalidData(msg.into())
    }

    /// Returns the I/O error kind if this is an I/O failure.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            StageError::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<io::Error> for StageError {
    fn from(err: io::Error) -> Self {
        StageError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Errors returned synchronously by pump creation and job submission.
#[derive(Debug, Error)]
pub enum PumpError {
    /// A thread count was zero or above the sanity bound.
    #[error("Invalid {role} thread count {requested} (must be at least 1 and below {limit})")]
    InvalidThreadCount {
        role: WorkerRole,
        requested: usize,
        limit: usize,
    },

    /// The OS refused to create a worker thread.
    #[error("Failed to spawn {role} worker thread: {source}")]
    Spawn {
        role: WorkerRole,
        #[source]
        source: io::Error,
    },

    /// Queue storage for a new job could not be allocated.
    #[error("Out of memory while queueing job: {0}")]
    Allocation(#[from] TryReserveError),

    /// The pump is being torn down and accepts no more work.
    #[error("Pump is shutting down")]
    ShuttingDown,
}

/// A rejected submission.
///
/// Ownership of the fetcher and transformer is never transferred when
/// submission fails; [`SubmitError::into_parts`] hands them back.
pub struct SubmitError<F, T> {
    error: PumpError,
    fetcher: F,
    transformer: T,
}

impl<F, T> SubmitError<F, T> {
    pub(crate) fn new(error: PumpError, fetcher: F, transformer: T) -> Self {
        Self {
            error,
            fetcher,
            transformer,
        }
    }

    /// The reason the submission was rejected.
    pub fn error(&self) -> &PumpError {
        &self.error
    }

    /// Returns the error together with the un-transferred collaborators.
    pub fn into_parts(self) -> (PumpError, F, T) {
        (self.error, self.fetcher, self.transformer)
    }
}

impl<F, T> fmt::Debug for SubmitError<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<F, T> fmt::Display for SubmitError<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to submit job: {}", self.error)
    }
}

impl<F, T> std::error::Error for SubmitError<F, T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
