//! The pump façade.
//!
//! [`Pump`] owns three queues and a fixed set of worker threads:
//!
//! ```text
//!  submit ──► [fetch queue] ──► fetch workers (N)
//!                                    │
//!                                    ▼
//!             [transform queue] ──► transform workers (M)
//!                                    │
//!                                    ▼
//!             [finalize queue] ──► drain_finalize() on the caller's thread
//! ```
//!
//! Finalization is never run by a pool worker. Whatever exclusive resource
//! `Transformer::finalize` needs (a graphics device context, a UI thread, ...)
//! stays on the thread the caller chooses to drain from.
//!
//! # Lifecycle
//!
//! `Pump` is a reference-counted handle: cloning acquires a reference and
//! dropping releases it. When the last handle is dropped the pump closes all
//! queues, joins every worker and cancels whatever jobs remain.
//!
//! # Example
//!
//! ```ignore
//! use stagepump::{MemoryFetcher, ObjectSlot, Pump, PumpConfig, ResultSlot};
//!
//! let pump = Pump::new(&PumpConfig::new(1, 2))?;
//! let result = ResultSlot::new();
//! let object = ObjectSlot::new();
//!
//! pump.submit(
//!     MemoryFetcher::new(&b"payload"[..]),
//!     my_transformer,
//!     Some(result.clone()),
//!     Some(object.clone()),
//! )?;
//!
//! pump.wait_for_all();
//! assert!(result.get().unwrap().is_success());
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::{PumpConfig, ResolvedThreads};
use crate::counter::OutstandingCounter;
use crate::error::{PumpError, SubmitError};
use crate::job::{Job, JobHandle, JobIdSource, JobStatus, ObjectSlot, ResultSlot};
use crate::queue::{FinalizeQueue, QueueStatus, StageQueue};
use crate::traits::{Fetcher, Transformer};
use crate::worker::{self, WorkerRole};

/// Drain limit meaning "until the finalize queue is empty".
pub const UNBOUNDED: usize = usize::MAX;

/// Identifiers for jobs run inline by [`run_now`].
static INLINE_IDS: JobIdSource = JobIdSource::new();

/// State shared between pump handles and worker threads.
pub(crate) struct Shared<O> {
    pub(crate) fetch: StageQueue<O>,
    pub(crate) transform: StageQueue<O>,
    pub(crate) finalize: FinalizeQueue<O>,
    /// Jobs in the fetch or transform stage.
    pub(crate) outstanding: OutstandingCounter,
    ids: JobIdSource,
}

impl<O> Shared<O> {
    fn new() -> Self {
        Self {
            fetch: StageQueue::new("fetch"),
            transform: StageQueue::new("transform"),
            finalize: FinalizeQueue::new(),
            outstanding: OutstandingCounter::new(),
            ids: JobIdSource::default(),
        }
    }

    /// Cancels every job left in the fetch and transform queues.
    ///
    /// Returns the number of jobs cancelled.
    fn cancel_staged(&self) -> usize {
        let mut cancelled = 0;
        for queue in [&self.fetch, &self.transform] {
            for job in queue.drain() {
                debug!(job = %job.id(), "Cancelling queued job");
                job.cancel();
                self.outstanding.decrement();
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Owner of the worker threads; dropping it shuts the pump down.
struct PumpInner<O> {
    shared: Arc<Shared<O>>,
    workers: Vec<JoinHandle<()>>,
    threads: ResolvedThreads,
}

impl<O> Drop for PumpInner<O> {
    fn drop(&mut self) {
        info!(
            fetch_threads = self.threads.fetch,
            transform_threads = self.threads.transform,
            "Shutting down pump"
        );

        self.shared.fetch.close();
        self.shared.transform.close();
        self.shared.finalize.close();

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A collaborator holding the last handle may drop it on a worker.
            if handle.thread().id() == current {
                warn!("Last pump handle dropped on a worker thread, not joining it");
                continue;
            }
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "Worker thread panicked");
            }
        }

        let mut cancelled = self.shared.cancel_staged();
        let (jobs, ()) = self.shared.finalize.drain_then(|| ());
        for job in jobs {
            debug!(job = %job.id(), "Cancelling unfinalized job");
            job.cancel();
            cancelled += 1;
        }

        info!(cancelled, "Pump stopped");
    }
}

/// Asynchronous fetch → transform → finalize work pump.
///
/// See the [module documentation](self) for the stage layout.
pub struct Pump<O> {
    inner: Arc<PumpInner<O>>,
}

impl<O: Send + 'static> Pump<O> {
    /// Creates a pump and starts its worker threads.
    ///
    /// # Errors
    ///
    /// - [`PumpError::InvalidThreadCount`] if a count is zero or too large
    /// - [`PumpError::Spawn`] if a worker thread cannot be created; workers
    ///   already started are stopped before returning
    pub fn new(config: &PumpConfig) -> Result<Self, PumpError> {
        let threads = config.resolve()?;
        let shared = Arc::new(Shared::new());
        let mut inner = PumpInner {
            shared: Arc::clone(&shared),
            workers: Vec::with_capacity(threads.fetch + threads.transform),
            threads,
        };

        let roles = std::iter::repeat(WorkerRole::Fetch)
            .take(threads.fetch)
            .enumerate()
            .chain(
                std::iter::repeat(WorkerRole::Transform)
                    .take(threads.transform)
                    .enumerate(),
            );

        for (index, role) in roles {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}-{}", config.thread_name_prefix, role, index))
                .spawn(move || worker::run(role, index, worker_shared));

            match spawned {
                Ok(handle) => inner.workers.push(handle),
                Err(source) => {
                    warn!(%role, error = %source, "Failed to spawn worker thread");
                    // Dropping `inner` stops and joins the workers started so far.
                    return Err(PumpError::Spawn { role, source });
                }
            }
        }

        info!(
            fetch_threads = threads.fetch,
            transform_threads = threads.transform,
            "Pump started"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Creates a pump with the given worker counts; `0` selects the default.
    pub fn with_threads(fetch_threads: usize, transform_threads: usize) -> Result<Self, PumpError> {
        Self::new(&PumpConfig::new(fetch_threads, transform_threads))
    }
}

impl<O> Pump<O> {
    fn shared(&self) -> &Shared<O> {
        &self.inner.shared
    }

    /// Queues a job for fetching. Never blocks on the job itself.
    ///
    /// Ownership of `fetcher` and `transformer` moves into the pump on
    /// success. `object` is cleared now and filled only if finalize succeeds;
    /// `result` receives the terminal status.
    ///
    /// # Errors
    ///
    /// Fails atomically on allocation failure: no pump state changes and the
    /// collaborators are handed back through [`SubmitError::into_parts`].
    pub fn submit<F, T>(
        &self,
        fetcher: F,
        transformer: T,
        result: Option<ResultSlot>,
        object: Option<ObjectSlot<O>>,
    ) -> Result<JobHandle, SubmitError<F, T>>
    where
        F: Fetcher + 'static,
        T: Transformer<Output = O> + 'static,
    {
        let shared = self.shared();
        let reservation = match shared.fetch.reserve() {
            Ok(reservation) => reservation,
            Err(error) => return Err(SubmitError::new(error, fetcher, transformer)),
        };

        let job = Job::new(
            shared.ids.next(),
            Box::new(fetcher),
            Box::new(transformer),
            result,
            object,
        );
        let handle = job.handle();

        shared.outstanding.increment();
        reservation.push(job);

        debug!(job = %handle.id(), "Job submitted");
        Ok(handle)
    }

    /// Finalizes up to `max_count` jobs on the calling thread.
    ///
    /// Stops early when the finalize queue is empty; never waits for more
    /// work. Pass [`UNBOUNDED`] to drain everything currently queued. Returns
    /// the number of jobs finalized.
    pub fn drain_finalize(&self, max_count: usize) -> usize {
        let shared = self.shared();
        let mut processed = 0;

        while processed < max_count {
            let Some(job) = shared.finalize.pop() else {
                break;
            };
            let id = job.id();
            let status = job.finalize();
            debug!(job = %id, %status, "Job finalized");
            processed += 1;
        }

        processed
    }

    /// Jobs not yet fully finalized: in a worker stage or awaiting finalize.
    pub fn outstanding_count(&self) -> usize {
        let shared = self.shared();
        shared
            .finalize
            .with_len(|finalize| shared.outstanding.get() + finalize)
    }

    /// Drains the finalize queue until every job has finished.
    ///
    /// Finalization runs on the calling thread. Terminates only if no other
    /// thread keeps submitting jobs meanwhile.
    pub fn wait_for_all(&self) {
        let shared = self.shared();
        loop {
            self.drain_finalize(UNBOUNDED);

            let observed = shared
                .finalize
                .with_len(|finalize| (finalize == 0).then(|| shared.outstanding.get()));
            match observed {
                None => continue,
                Some(0) => return,
                Some(outstanding) => shared.outstanding.wait_while(outstanding),
            }
        }
    }

    /// Cancels every queued job.
    ///
    /// Jobs currently held by a worker are caught on a later pass once the
    /// worker routes them into a queue, so this returns only when no job
    /// remains in a worker stage.
    pub fn purge_all(&self) {
        let shared = self.shared();
        let mut cancelled = 0;

        loop {
            cancelled += shared.cancel_staged();

            let (jobs, outstanding) = shared.finalize.drain_then(|| shared.outstanding.get());
            for job in jobs {
                debug!(job = %job.id(), "Cancelling unfinalized job");
                job.cancel();
                cancelled += 1;
            }

            if outstanding == 0 {
                break;
            }
            shared.outstanding.wait_while(outstanding);
        }

        if cancelled > 0 {
            info!(cancelled, "Purged queued jobs");
        }
    }

    /// Snapshot of the three queue lengths.
    pub fn queue_status(&self) -> QueueStatus {
        let shared = self.shared();
        QueueStatus {
            fetch: shared.fetch.len(),
            transform: shared.transform.len(),
            finalize: shared.finalize.len(),
        }
    }

    /// Number of fetch and transform workers.
    pub fn threads(&self) -> ResolvedThreads {
        self.inner.threads
    }

    /// Number of live handles to this pump.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<O> Clone for Pump<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O> fmt::Debug for Pump<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("threads", &self.inner.threads)
            .field("queues", &self.queue_status())
            .field("outstanding", &self.shared().outstanding.get())
            .finish()
    }
}

/// Runs fetch, transform and finalize on the calling thread, without a pump.
///
/// Slot semantics match [`Pump::submit`]: `object` is cleared first and filled
/// only on success, `result` receives the returned status, and both
/// collaborators are released before this returns. Panics raised by the
/// collaborators are contained the same way.
pub fn run_now<O, F, T>(
    fetcher: F,
    transformer: T,
    result: Option<ResultSlot>,
    object: Option<ObjectSlot<O>>,
) -> JobStatus
where
    F: Fetcher + 'static,
    T: Transformer<Output = O> + 'static,
{
    let job = Job::new(
        INLINE_IDS.next(),
        Box::new(fetcher),
        Box::new(transformer),
        result,
        object,
    );
    debug!(job = %job.id(), "Running job inline");
    job.run()
}

/// Submits to `pump` when one is given, otherwise runs the job with [`run_now`].
///
/// Returns `Ok(None)` once a queued job is accepted and `Ok(Some(status))`
/// for an inline run.
pub fn submit_or_run<O, F, T>(
    pump: Option<&Pump<O>>,
    fetcher: F,
    transformer: T,
    result: Option<ResultSlot>,
    object: Option<ObjectSlot<O>>,
) -> Result<Option<JobStatus>, SubmitError<F, T>>
where
    F: Fetcher + 'static,
    T: Transformer<Output = O> + 'static,
{
    match pump {
        Some(pump) => pump
            .submit(fetcher, transformer, result, object)
            .map(|_| None),
        None => Ok(Some(run_now(fetcher, transformer, result, object))),
    }
}
