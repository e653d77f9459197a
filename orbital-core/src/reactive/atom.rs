//! Atom implementation.
//!
//! An atom is the fundamental reactive primitive: an equality-gated mutable
//! state cell and the unit of observation. Reading it inside a capture
//! registers it as a dependency; writing it notifies its listeners, unless
//! the equality gate decides the write is a no-op.
//!
//! # Equality gate
//!
//! Every atom carries an `equals` predicate, defaulting to `PartialEq`. When
//! the predicate reports the incoming value equal to the current one, the
//! stored value is NOT replaced and no notification is issued, even if the
//! incoming value is representationally different. This preserves identity
//! for values that are unchanged by policy.
//!
//! # Sharing
//!
//! `Atom<T>` is a cheap handle over shared inner state; clones observe the
//! same cell. The value sits behind an `RwLock` so handles can cross
//! threads, while capture and batch bookkeeping stay thread-local.

use std::sync::{Arc, RwLock, Weak};

use super::batch;
use super::context;
use super::listener::{AtomId, ListenerFn, ListenerId, Listeners, Subscription};

pub(crate) struct AtomInner<T> {
    value: RwLock<T>,
    equals: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    listeners: Arc<Listeners>,
    /// Keep-alive slot for the driver of a derived atom. The driver holds
    /// only a `Weak` back to this inner, so the registration on its sources
    /// dies as soon as the last external handle is dropped.
    retained: RwLock<Option<Arc<ListenerFn>>>,
}

/// A reactive, equality-gated mutable state cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = atom(0);
///
/// // Read the value (tracked inside a capture)
/// let value = count.get();
///
/// // Replace the value (notifies listeners unless equal)
/// count.set(5);
///
/// // Or derive the next value from the current one
/// count.update(|n| n + 1);
/// ```
pub struct Atom<T> {
    inner: Arc<AtomInner<T>>,
}

/// Create an atom with the default `PartialEq` equality gate.
pub fn atom<T>(value: T) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Atom::new(value)
}

impl<T> Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new atom with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equals(value, T::eq)
    }

    /// Create a new atom with a custom equality predicate.
    ///
    /// The predicate is consulted on every write; when it returns `true` the
    /// write is suppressed entirely.
    pub fn with_equals(
        value: T,
        equals: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        let id = AtomId::new();
        Self {
            inner: Arc::new(AtomInner {
                value: RwLock::new(value),
                equals: Box::new(equals),
                listeners: Arc::new(Listeners::new(id)),
                retained: RwLock::new(None),
            }),
        }
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> AtomId {
        self.inner.listeners.atom_id()
    }

    /// Get the current value, registering the atom into every active
    /// capture frame.
    pub fn get(&self) -> T {
        context::track(&self.inner.listeners);
        self.inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
    }

    /// Get the current value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
    }

    /// Replace the value and notify listeners.
    ///
    /// The write is a no-op when the equality gate reports `next` equal to
    /// the current value: nothing is stored and nobody is notified. Returns
    /// the resulting value either way.
    pub fn set(&self, next: T) -> T {
        let result = {
            let mut value = self.inner.value.write().expect("value lock poisoned");
            if (self.inner.equals)(&value, &next) {
                return value.clone();
            }
            *value = next;
            value.clone()
        };

        batch::notify(&self.inner.listeners);
        result
    }

    /// Compute the next value from the current one, then [`set`](Self::set) it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> T {
        let next = f(&self.peek());
        self.set(next)
    }

    /// Number of live listeners registered on this atom.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Register a raw change listener on this atom alone, bypassing capture.
    ///
    /// Used by the sync layer, where the dependency is the atom itself by
    /// construction and no molecule is involved.
    pub(crate) fn watch(&self, listener: Arc<ListenerFn>) -> Subscription {
        let id = ListenerId::new();
        self.inner.listeners.connect(id, Arc::downgrade(&listener));
        let listeners = Arc::clone(&self.inner.listeners);
        Subscription::new(move || {
            listeners.disconnect(id);
            drop(listener);
        })
    }

    /// Store the driver that keeps a derived atom re-deriving. Held strongly
    /// here and only weakly everywhere else.
    pub(crate) fn retain(&self, driver: Arc<ListenerFn>) {
        *self
            .inner
            .retained
            .write()
            .expect("retained lock poisoned") = Some(driver);
    }

    pub(crate) fn downgrade(&self) -> Weak<AtomInner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<AtomInner<T>>) -> Self {
        Self { inner }
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Atom<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id().raw())
            .field("value", &self.peek())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
