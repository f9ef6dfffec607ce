//! Fetch and transform worker loops.
//!
//! Each worker runs the same four-state loop:
//!
//! ```text
//! WaitForWork ──► Working ──► Routing ──┐
//!      ▲  │                             │
//!      │  └── queue closed ──► Exiting  │
//!      └────────────────────────────────┘
//! ```
//!
//! A job popped by a worker is owned by that worker alone until it is pushed
//! onto the next queue or settled. Stage failures are settled locally and
//! never leave the worker thread.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::pump::Shared;

/// The kind of worker pool a thread belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Fetch,
    Transform,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Fetch => "fetch",
            WorkerRole::Transform => "transform",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs a worker loop for the given role until its queue closes.
pub(crate) fn run<O>(role: WorkerRole, index: usize, shared: Arc<Shared<O>>) {
    debug!(%role, worker = index, "Worker started");
    match role {
        WorkerRole::Fetch => fetch_loop(&shared),
        WorkerRole::Transform => transform_loop(&shared),
    }
    debug!(%role, worker = index, "Worker exiting");
}

fn fetch_loop<O>(shared: &Shared<O>) {
    while let Some(mut job) = shared.fetch.pop_blocking() {
        if let Err(failure) = job.fetch() {
            debug!(job = %job.id(), error = %failure, "Job failed");
            job.fail(failure);
            shared.outstanding.decrement();
            continue;
        }

        if let Err(job) = shared.transform.push(job) {
            debug!(job = %job.id(), "Transform queue closed, cancelling job");
            job.cancel();
            shared.outstanding.decrement();
            return;
        }
    }
}

fn transform_loop<O>(shared: &Shared<O>) {
    while let Some(mut job) = shared.transform.pop_blocking() {
        if shared.finalize.is_closed() {
            debug!(job = %job.id(), "Finalize queue closed, cancelling job");
            job.cancel();
            shared.outstanding.decrement();
            return;
        }

        if let Err(failure) = job.transform() {
            debug!(job = %job.id(), error = %failure, "Job failed");
            job.fail(failure);
            shared.outstanding.decrement();
            continue;
        }

        // The job leaves the worker-driven stages here, so the counter drops
        // while the finalize lock is held.
        let routed = shared.finalize.push_with(job, || {
            shared.outstanding.decrement();
        });
        if let Err(job) = routed {
            debug!(job = %job.id(), "Finalize queue closed, cancelling job");
            job.cancel();
            shared.outstanding.decrement();
            return;
        }
    }
}
