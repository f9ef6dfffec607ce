//! FIFO job queues shared between the pump and its workers.
//!
//! Two queue flavours exist:
//!
//! - [`StageQueue`]: feeds a pool of blocking workers (fetch, transform). It
//!   pairs the job list with a condition variable that wakes one worker per
//!   pushed job and all workers on close.
//! - [`FinalizeQueue`]: drained synchronously by the caller; nothing ever
//!   blocks waiting for it to fill, so it has no wake signal.
//!
//! Both queues carry a `closed` flag set during pump shutdown. Once closed, a
//! queue refuses new jobs and its workers exit even if jobs remain; those are
//! swept and cancelled by the shutdown path.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::PumpError;
use crate::job::Job;

/// Jobs plus the closed flag, always mutated together under one lock.
struct QueueState<O> {
    items: VecDeque<Job<O>>,
    closed: bool,
}

impl<O> QueueState<O> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            closed: false,
        }
    }
}

// =============================================================================
// Stage Queue
// =============================================================================

/// Queue feeding a pool of blocking workers.
pub(crate) struct StageQueue<O> {
    name: &'static str,
    state: Mutex<QueueState<O>>,
    wake: Condvar,
}

impl<O> StageQueue<O> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState::new()),
            wake: Condvar::new(),
        }
    }

    /// Reserves room for one job, holding the queue lock until the job is
    /// pushed.
    ///
    /// Fails without side effects if the queue is closed or storage cannot be
    /// allocated.
    pub(crate) fn reserve(&self) -> Result<Reservation<'_, O>, PumpError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PumpError::ShuttingDown);
        }
        state.items.try_reserve(1)?;
        Ok(Reservation { queue: self, state })
    }

    /// Appends a job and wakes one worker.
    ///
    /// Returns the job if the queue is closed.
    pub(crate) fn push(&self, job: Job<O>) -> Result<(), Job<O>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(job);
        }
        state.items.push_back(job);
        drop(state);
        self.wake.notify_one();
        Ok(())
    }

    /// Blocks until a job is available and removes it.
    ///
    /// Returns `None` once the queue is closed, even if jobs remain.
    pub(crate) fn pop_blocking(&self) -> Option<Job<O>> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            self.wake.wait(&mut state);
        }
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Removes every queued job.
    pub(crate) fn drain(&self) -> Vec<Job<O>> {
        self.state.lock().items.drain(..).collect()
    }

    /// Marks the queue closed and wakes every waiting worker.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.wake.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl<O> fmt::Debug for StageQueue<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StageQueue")
            .field("name", &self.name)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A locked stage queue with room for exactly one more job.
pub(crate) struct Reservation<'a, O> {
    queue: &'a StageQueue<O>,
    state: MutexGuard<'a, QueueState<O>>,
}

impl<O> Reservation<'_, O> {
    /// Appends the job, releases the lock and wakes one worker.
    pub(crate) fn push(self, job: Job<O>) {
        let Reservation { queue, mut state } = self;
        state.items.push_back(job);
        drop(state);
        queue.wake.notify_one();
    }
}

// =============================================================================
// Finalize Queue
// =============================================================================

/// Queue of jobs waiting for a caller-driven finalize.
pub(crate) struct FinalizeQueue<O> {
    state: Mutex<QueueState<O>>,
}

impl<O> FinalizeQueue<O> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
        }
    }

    /// Appends a job, running `on_enqueued` while the lock is still held.
    ///
    /// Observers reading the queue length under the same lock therefore never
    /// see the job counted twice or not at all. Returns the job if the queue
    /// is closed.
    pub(crate) fn push_with(&self, job: Job<O>, on_enqueued: impl FnOnce()) -> Result<(), Job<O>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(job);
        }
        state.items.push_back(job);
        on_enqueued();
        Ok(())
    }

    /// Removes the head job without blocking.
    pub(crate) fn pop(&self) -> Option<Job<O>> {
        self.state.lock().items.pop_front()
    }

    /// Calls `f` with the queue length while holding the lock.
    pub(crate) fn with_len<R>(&self, f: impl FnOnce(usize) -> R) -> R {
        let state = self.state.lock();
        f(state.items.len())
    }

    /// Removes every queued job and calls `f` before releasing the lock.
    pub(crate) fn drain_then<R>(&self, f: impl FnOnce() -> R) -> (Vec<Job<O>>, R) {
        let mut state = self.state.lock();
        let jobs = state.items.drain(..).collect();
        (jobs, f())
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl<O> fmt::Debug for FinalizeQueue<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FinalizeQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// =============================================================================
// Queue Status
// =============================================================================

/// Point-in-time snapshot of the three queue lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// Jobs waiting for a fetch worker.
    pub fetch: usize,
    /// Jobs waiting for a transform worker.
    pub transform: usize,
    /// Jobs waiting for `drain_finalize`.
    pub finalize: usize,
}

impl QueueStatus {
    /// Total number of queued jobs.
    pub fn total(&self) -> usize {
        self.fetch + self.transform + self.finalize
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch={} transform={} finalize={}",
            self.fetch, self.transform, self.finalize
        )
    }
}
