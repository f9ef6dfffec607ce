//! Capability traits consumed by the pump.
//!
//! A job is made of two collaborators:
//!
//! - A [`Fetcher`] obtains raw bytes (from memory, a file, an archive, ...).
//! - A [`Transformer`] turns those bytes into a ready-to-finalize form on a
//!   worker thread, then produces the final object on the thread that drains
//!   the finalize queue.
//!
//! Releasing a collaborator is expressed through `Drop`: the pump drops the
//! fetcher and transformer exactly once per job, after success, failure or
//! cancellation.
//!
//! # Example
//!
//! ```ignore
//! use stagepump::{Fetcher, StageError, Transformer};
//!
//! struct Greeting(Vec<u8>);
//!
//! impl Fetcher for Greeting {
//!     fn fetch(&mut self) -> Result<(), StageError> {
//!         Ok(())
//!     }
//!
//!     fn materialize(&mut self) -> Result<&[u8], StageError> {
//!         Ok(&self.0)
//!     }
//! }
//!
//! struct Upper(Option<String>);
//!
//! impl Transformer for Upper {
//!     type Output = String;
//!
//!     fn transform(&mut self, data: &[u8]) -> Result<(), StageError> {
//!         self.0 = Some(String::from_utf8_lossy(data).to_uppercase());
//!         Ok(())
//!     }
//!
//!     fn finalize(&mut self) -> Result<String, StageError> {
//!         self.0.take().ok_or(StageError::NotReady)
//!     }
//! }
//! ```

use crate::error::StageError;

/// Obtains the raw payload for a job.
///
/// Runs on fetch and transform worker threads, hence `Send`.
pub trait Fetcher: Send {
    /// Makes the payload available.
    ///
    /// May be called more than once; each call should refresh or re-validate
    /// the payload. Callers must not assume it runs exactly once.
    fn fetch(&mut self) -> Result<(), StageError>;

    /// Returns the fetched bytes.
    ///
    /// Must not fail after a successful [`fetch`](Fetcher::fetch). The pump
    /// calls this exactly once per job, on a transform worker.
    fn materialize(&mut self) -> Result<&[u8], StageError>;
}

/// Converts fetched bytes into the final object.
pub trait Transformer: Send {
    /// The object produced by [`finalize`](Transformer::finalize).
    type Output;

    /// Consumes raw bytes into an internal ready-to-finalize form.
    ///
    /// Runs on a transform worker thread.
    fn transform(&mut self, data: &[u8]) -> Result<(), StageError>;

    /// Produces the final object.
    ///
    /// Only ever called from [`Pump::drain_finalize`](crate::Pump::drain_finalize),
    /// on the thread that calls it.
    fn finalize(&mut self) -> Result<Self::Output, StageError>;
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&mut self) -> Result<(), StageError> {
        (**self).fetch()
    }

    fn materialize(&mut self) -> Result<&[u8], StageError> {
        (**self).materialize()
    }
}

impl<T: Transformer + ?Sized> Transformer for Box<T> {
    type Output = T::Output;

    fn transform(&mut self, data: &[u8]) -> Result<(), StageError> {
        (**self).transform(data)
    }

    fn finalize(&mut self) -> Result<Self::Output, StageError> {
        (**self).finalize()
    }
}
