//! Jobs, job status and the caller-visible output slots.
//!
//! A [`Job`] bundles a fetcher, a transformer and two optional output slots.
//! It is owned by exactly one queue or one thread at any instant and ends in
//! one of three terminal states: success, failure or cancellation. Reaching a
//! terminal state always:
//!
//! 1. Drops (releases) the fetcher and transformer
//! 2. Publishes the [`JobStatus`] to the [`ResultSlot`], if one was supplied
//!
//! in that order, so a caller who observes a status also observes the release.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::StageError;
use crate::traits::{Fetcher, Transformer};

// =============================================================================
// Identity
// =============================================================================

/// Pump-unique job identifier, assigned in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Returns the raw sequence number.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Monotonic source of job identifiers.
#[derive(Debug, Default)]
pub(crate) struct JobIdSource(AtomicU64);

impl JobIdSource {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub(crate) fn next(&self) -> JobId {
        JobId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle returned by [`Pump::submit`](crate::Pump::submit).
///
/// The handle only identifies the job; completion is observed through the
/// slots passed at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: JobId,
}

impl JobHandle {
    /// The identifier of the submitted job.
    pub fn id(&self) -> JobId {
        self.id
    }
}

// =============================================================================
// Status
// =============================================================================

/// The step at which a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// `Fetcher::fetch`, on a fetch worker.
    Fetch,
    /// `Fetcher::materialize`, on a transform worker.
    Materialize,
    /// `Transformer::transform`, on a transform worker.
    Transform,
    /// `Transformer::finalize`, on the draining thread.
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Materialize => "materialize",
            Stage::Transform => "transform",
            Stage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// A stage error together with the stage that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: StageError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: StageError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Finalize produced an object.
    Success,
    /// The job was removed by a purge or by pump shutdown.
    Cancelled,
    /// A fetcher or transformer call reported an error.
    Failed(StageFailure),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobStatus::Cancelled)
    }

    /// Returns the failure details, if the job failed.
    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            JobStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => f.write_str("success"),
            JobStatus::Cancelled => f.write_str("cancelled"),
            JobStatus::Failed(failure) => write!(f, "{}", failure),
        }
    }
}

// =============================================================================
// Output Slots
// =============================================================================

/// Shared location receiving a job's terminal status.
///
/// Cloning yields another handle to the same slot. The pump writes it once
/// per job; callers should read it only after they know the job finished
/// (for example after [`Pump::wait_for_all`](crate::Pump::wait_for_all)).
#[derive(Clone, Default)]
pub struct ResultSlot {
    status: Arc<Mutex<Option<JobStatus>>>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the published status, if any.
    pub fn get(&self) -> Option<JobStatus> {
        self.status.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.status.lock().is_some()
    }

    fn publish(&self, status: JobStatus) {
        *self.status.lock() = Some(status);
    }
}

impl fmt::Debug for ResultSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResultSlot").field(&*self.status.lock()).finish()
    }
}

/// Shared location receiving the object produced by a successful finalize.
pub struct ObjectSlot<O> {
    object: Arc<Mutex<Option<O>>>,
}

impl<O> ObjectSlot<O> {
    pub fn new() -> Self {
        Self {
            object: Arc::new(Mutex::new(None)),
        }
    }

    /// Moves the object out of the slot.
    pub fn take(&self) -> Option<O> {
        self.object.lock().take()
    }

    pub fn is_filled(&self) -> bool {
        self.object.lock().is_some()
    }

    pub(crate) fn clear(&self) {
        *self.object.lock() = None;
    }

    fn fill(&self, object: O) {
        *self.object.lock() = Some(object);
    }
}

impl<O> Clone for ObjectSlot<O> {
    fn clone(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
        }
    }
}

impl<O> Default for ObjectSlot<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Debug for ObjectSlot<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSlot")
            .field("filled", &self.is_filled())
            .finish()
    }
}

/// Publishes a job's status exactly once.
///
/// If dropped without an explicit status (a job lost on an unexpected path),
/// it publishes [`JobStatus::Cancelled`] so the slot is never left unset.
struct StatusReporter {
    slot: Option<ResultSlot>,
}

impl StatusReporter {
    fn report(mut self, status: JobStatus) {
        if let Some(slot) = self.slot.take() {
            slot.publish(status);
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.publish(JobStatus::Cancelled);
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// A unit of work moving through the pump.
pub(crate) struct Job<O> {
    id: JobId,
    fetcher: Box<dyn Fetcher>,
    transformer: Box<dyn Transformer<Output = O>>,
    reporter: StatusReporter,
    object: Option<ObjectSlot<O>>,
}

impl<O> Job<O> {
    pub(crate) fn new(
        id: JobId,
        fetcher: Box<dyn Fetcher>,
        transformer: Box<dyn Transformer<Output = O>>,
        result: Option<ResultSlot>,
        object: Option<ObjectSlot<O>>,
    ) -> Self {
        if let Some(slot) = &object {
            slot.clear();
        }
        Self {
            id,
            fetcher,
            transformer,
            reporter: StatusReporter { slot: result },
            object,
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn handle(&self) -> JobHandle {
        JobHandle { id: self.id }
    }

    /// Runs the fetch stage.
    pub(crate) fn fetch(&mut self) -> Result<(), StageFailure> {
        trace!(job = %self.id, "fetching");
        contain(Stage::Fetch, || self.fetcher.fetch())
    }

    /// Materializes the payload and hands it to the transformer.
    pub(crate) fn transform(&mut self) -> Result<(), StageFailure> {
        trace!(job = %self.id, "transforming");
        let fetcher: &mut dyn Fetcher = &mut *self.fetcher;
        let transformer = &mut self.transformer;

        // The borrow is moved into the closure so the payload can outlive it.
        let data = contain(Stage::Materialize, move || {
            let fetcher = fetcher;
            fetcher.materialize()
        })?;
        contain(Stage::Transform, || transformer.transform(data))
    }

    /// Runs finalize on the calling thread and settles the job.
    pub(crate) fn finalize(mut self) -> JobStatus {
        trace!(job = %self.id, "finalizing");
        let transformer = &mut self.transformer;
        match contain(Stage::Finalize, || transformer.finalize()) {
            Ok(object) => {
                if let Some(slot) = &self.object {
                    slot.fill(object);
                }
                self.settle(JobStatus::Success)
            }
            Err(failure) => self.settle(JobStatus::Failed(failure)),
        }
    }

    /// Runs every stage on the calling thread.
    pub(crate) fn run(mut self) -> JobStatus {
        if let Err(failure) = self.fetch() {
            return self.fail(failure);
        }
        if let Err(failure) = self.transform() {
            return self.fail(failure);
        }
        self.finalize()
    }

    /// Settles the job as failed.
    pub(crate) fn fail(self, failure: StageFailure) -> JobStatus {
        self.settle(JobStatus::Failed(failure))
    }

    /// Settles the job as cancelled.
    pub(crate) fn cancel(self) {
        self.settle(JobStatus::Cancelled);
    }

    fn settle(self, status: JobStatus) -> JobStatus {
        let Job {
            id,
            fetcher,
            transformer,
            reporter,
            object: _,
        } = self;

        // A panicking release must not keep the status from being published.
        release(id, "fetcher", fetcher);
        release(id, "transformer", transformer);

        trace!(job = %id, %status, "job settled");
        reporter.report(status.clone());
        status
    }
}

impl<O> fmt::Debug for Job<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

/// Runs a collaborator call, turning both errors and panics into a failure.
fn contain<R>(
    stage: Stage,
    call: impl FnOnce() -> Result<R, StageError>,
) -> Result<R, StageFailure> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|error| StageFailure::new(stage, error)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%stage, panic = %message, "Collaborator panicked, job failed");
            Err(StageFailure::new(stage, StageError::Panicked(message)))
        }
    }
}

/// Drops a collaborator, logging a panic raised by its `Drop`.
fn release<T: ?Sized>(id: JobId, what: &str, value: Box<T>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(value))) {
        let message = panic_message(payload.as_ref());
        warn!(job = %id, collaborator = what, panic = %message, "Collaborator panicked on release");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
