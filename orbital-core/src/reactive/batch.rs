//! Change notification and batching.
//!
//! Outside a batch, writing an atom invokes its listeners immediately,
//! against a snapshot of the listener table taken at notify time. Inside a
//! batch, listeners are collected into a pending set instead and fired once
//! when the outermost batch exits, no matter how many of their dependencies
//! changed in between.
//!
//! The batch flag and pending set are thread-local, like the capture stack:
//! all notification bookkeeping is synchronous on the writing thread.

use std::cell::RefCell;
use std::mem;
use std::sync::Weak;

use super::listener::{ListenerFn, ListenerId, Listeners};

struct BatchState {
    active: bool,
    pending: Vec<(ListenerId, Weak<ListenerFn>)>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState {
        active: false,
        pending: Vec::new(),
    });
}

/// Whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|batch| batch.borrow().active)
}

/// Deliver a change notification for one atom.
///
/// Pending entries are deduplicated by listener ID, so a listener registered
/// on several changed atoms still fires exactly once per batch.
pub(crate) fn notify(listeners: &Listeners) {
    let snapshot = listeners.snapshot();

    let deferred = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        if !batch.active {
            return false;
        }
        for (id, callback) in &snapshot {
            if !batch.pending.iter().any(|(pending, _)| pending == id) {
                batch.pending.push((*id, callback.clone()));
            }
        }
        true
    });

    if deferred {
        return;
    }

    for (_, callback) in snapshot {
        if let Some(callback) = callback.upgrade() {
            callback();
        }
    }
}

/// Guard that clears the batch flag, discarding pending entries on unwind.
struct BatchGuard;

impl BatchGuard {
    fn begin() -> Self {
        BATCH.with(|batch| batch.borrow_mut().active = true);
        Self
    }

    fn finish(self) -> Vec<(ListenerId, Weak<ListenerFn>)> {
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.active = false;
            mem::take(&mut batch.pending)
        })
        // Drop runs afterwards and finds the flag already cleared.
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.active = false;
            batch.pending.clear();
        });
    }
}

/// Collapse every write inside `f` into a single notification flush.
///
/// Re-entrant calls run `f` directly: nesting batches does not create nested
/// flush points, only the outermost batch flushes. The flag is cleared before
/// the flush begins, so writes made by flushed listeners notify immediately.
/// If `f` panics the flag is restored and the pending set discarded.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    if is_batching() {
        return f();
    }

    let guard = BatchGuard::begin();
    let result = f();
    let pending = guard.finish();

    if !pending.is_empty() {
        tracing::trace!(listeners = pending.len(), "flushing batch");
    }
    for (_, callback) in pending {
        if let Some(callback) = callback.upgrade() {
            callback();
        }
    }

    result
}
