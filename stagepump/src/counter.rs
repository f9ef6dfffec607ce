//! Outstanding-job counter with wait-on-change semantics.
//!
//! The counter tracks jobs that are in the fetch or transform stage. It is a
//! lock-free atomic for readers and writers; a lock and condition variable
//! exist only so that waiters can park until the value changes.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub(crate) struct OutstandingCounter {
    value: AtomicUsize,
    lock: Mutex<()>,
    changed: Condvar,
}

impl OutstandingCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
        self.notify();
    }

    /// Decrements the counter and wakes every waiter. Returns the new value.
    pub(crate) fn decrement(&self) -> usize {
        let previous = self.value.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "outstanding counter underflow");
        self.notify();
        previous - 1
    }

    /// Blocks while the counter still equals `observed`.
    ///
    /// Returns immediately if the value already changed. Wakeups are not
    /// ordered; callers re-check whatever condition they are waiting for.
    pub(crate) fn wait_while(&self, observed: usize) {
        let mut guard = self.lock.lock();
        while self.get() == observed {
            self.changed.wait(&mut guard);
        }
    }

    // Taking the lock orders the notification after any waiter's check.
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.changed.notify_all();
    }
}
