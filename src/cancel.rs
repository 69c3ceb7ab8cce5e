// SPDX-License-Identifier: MIT
//
// Cancellation token for suspending operations (spec.md §5): "All
// suspensions are interruptible by a cancellation signal, which returns
// INTERRUPTED."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a [`CancelToken`] can wake up when cancelled. Implemented by
/// [`crate::channel::Channel`], whose own `Condvar` is what a caller
/// suspended with no deadline is actually parked on.
pub trait Notify: Send + Sync {
    fn notify(&self);
}

struct Inner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Weak<dyn Notify>>>,
}

/// A cooperatively-checked cancellation flag, cloned between the caller of a
/// suspending operation and whatever external code (e.g. a signal handler, a
/// session-teardown path) wants to interrupt it.
///
/// Flipping the flag alone isn't enough: a caller with no deadline is parked
/// on a `Condvar` with no timeout, so it would never notice a cancellation
/// that nothing else wakes it up for. Every suspending wait registers the
/// thing it's about to block on before parking; `cancel()` walks that list
/// and notifies each entry still alive, so a cancelled wait wakes up
/// promptly instead of waiting on an unrelated event.
#[derive(Clone)]
pub struct CancelToken(Arc<Inner>);

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(Inner { cancelled: AtomicBool::new(false), waiters: Mutex::new(Vec::new()) }))
    }

    /// Request cancellation. Idempotent. Wakes every currently-registered
    /// waiter.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
        for w in self.0.waiters.lock().iter() {
            if let Some(n) = w.upgrade() {
                n.notify();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Register a waiter to be woken by a future `cancel()`. Prunes dead
    /// entries first, so a token reused across many waits doesn't
    /// accumulate stale ones.
    pub(crate) fn register(&self, waiter: Weak<dyn Notify>) {
        let mut waiters = self.0.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(waiter);
    }
}
