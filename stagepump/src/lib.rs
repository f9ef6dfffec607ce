//! Stagepump - a multi-stage work pump for background resource loading
//!
//! Jobs move through three stages:
//!
//! 1. **Fetch** on a pool of fetch workers: obtain raw bytes
//! 2. **Transform** on a pool of transform workers: turn bytes into a
//!    ready-to-finalize form
//! 3. **Finalize** on whatever thread calls [`Pump::drain_finalize`]
//!
//! The last stage exists for work bound to one thread, such as uploading to a
//! graphics context. The pump never finalizes on its own; the host decides
//! when and how much to drain (for example a few jobs per rendered frame).
//!
//! Collaborators are supplied per job through the [`Fetcher`] and
//! [`Transformer`] traits. Built-in implementations live in [`fetchers`] and
//! [`transformers`].

pub mod config;
mod counter;
pub mod error;
pub mod fetchers;
mod job;
pub mod logging;
mod pump;
mod queue;
mod traits;
pub mod transformers;
mod worker;

pub use config::{default_config_path, ConfigError, PumpConfig, ResolvedThreads, ThreadCount};
pub use error::{PumpError, StageError, SubmitError};
pub use fetchers::{FileFetcher, LazyFetcher, MemoryFetcher};
pub use job::{JobHandle, JobId, JobStatus, ObjectSlot, ResultSlot, Stage, StageFailure};
pub use pump::{run_now, submit_or_run, Pump, UNBOUNDED};
pub use queue::QueueStatus;
pub use traits::{Fetcher, Transformer};
pub use transformers::{FnTransformer, MapOutput, TransformerExt};
pub use worker::WorkerRole;
