//! Listener bookkeeping for the reactive system.
//!
//! Every atom owns a listener table: a list of edges to the callbacks that
//! must fire when the atom's value changes. Edges hold the callback weakly;
//! the strong `Arc` lives with whoever owns the subscription (a
//! [`Subscription`] handle, or the inner of a derived atom). When the owner
//! goes away the edge dies with it and is pruned on the next notification,
//! so a derived value that becomes unreachable drops its source
//! registrations without any manual unsubscribe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// The callback type stored behind every listener edge.
pub(crate) type ListenerFn = dyn Fn() + Send + Sync;

/// Unique identifier for an atom.
///
/// Identity (not value) is what the dependency tracker keys on, so the ID is
/// generated from an atomic counter at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomId(u64);

impl AtomId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Unique identifier for a listener.
///
/// A single listener may be registered on several atoms at once (a molecule
/// reading three atoms registers the same listener on all three). The ID is
/// what keeps the pending set of a batch deduplicated and what disconnect
/// uses to find the edge in each table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One edge in a listener table.
struct Entry {
    id: ListenerId,
    callback: Weak<ListenerFn>,
}

/// The listener table owned by a single atom.
pub(crate) struct Listeners {
    atom_id: AtomId,
    entries: RwLock<Vec<Entry>>,
}

impl Listeners {
    pub(crate) fn new(atom_id: AtomId) -> Self {
        Self {
            atom_id,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn atom_id(&self) -> AtomId {
        self.atom_id
    }

    /// Register a listener edge. The table never holds the callback alive.
    pub(crate) fn connect(&self, id: ListenerId, callback: Weak<ListenerFn>) {
        self.entries
            .write()
            .expect("listener lock poisoned")
            .push(Entry { id, callback });
    }

    /// Remove every edge registered under `id`.
    pub(crate) fn disconnect(&self, id: ListenerId) {
        self.entries
            .write()
            .expect("listener lock poisoned")
            .retain(|entry| entry.id != id);
    }

    /// Take a stable snapshot of the live edges, pruning dead ones.
    ///
    /// Notification iterates the snapshot, never the table itself, so a
    /// listener added or removed mid-notification does not affect the pass
    /// already in flight.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, Weak<ListenerFn>)> {
        let mut entries = self.entries.write().expect("listener lock poisoned");
        entries.retain(|entry| entry.callback.strong_count() > 0);
        entries
            .iter()
            .map(|entry| (entry.id, entry.callback.clone()))
            .collect()
    }

    /// Number of live edges.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .expect("listener lock poisoned")
            .iter()
            .filter(|entry| entry.callback.strong_count() > 0)
            .count()
    }
}

/// Handle to a standing subscription.
///
/// Unsubscribing is idempotent and safe to invoke from within the very
/// listener being torn down. Dropping the handle unsubscribes as well; call
/// [`detach`](Subscription::detach) to keep the subscription alive for the
/// rest of the process instead.
pub struct Subscription {
    done: Arc<AtomicBool>,
    teardown: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Subscription {
    pub(crate) fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            done: Arc::new(AtomicBool::new(false)),
            teardown: Arc::new(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// Tear the subscription down. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let teardown = self
            .teardown
            .lock()
            .expect("teardown lock poisoned")
            .take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the subscription has already been torn down.
    pub fn is_unsubscribed(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Leak the subscription so it outlives the handle.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("unsubscribed", &self.is_unsubscribed())
            .finish()
    }
}
