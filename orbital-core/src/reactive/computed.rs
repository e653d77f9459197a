//! Derived atoms.
//!
//! A computed atom wraps an ordinary [`Atom`] whose value is the captured
//! result of a molecule. A driver listener re-captures and re-derives on
//! every upstream change, pushing the result through the wrapped atom's
//! normal write path so its equality gate still suppresses redundant
//! downstream notifications.
//!
//! The driver is retained inside the derived atom itself and holds only a
//! `Weak` back to it: once the last external handle to the derived atom is
//! dropped, the driver dies and its registrations on the source atoms are
//! pruned. No manual unsubscribe is required to avoid leaking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::atom::Atom;
use super::context::{capture, Dependencies};
use super::listener::{ListenerFn, ListenerId};

/// Derive an atom from a molecule with the default `PartialEq` gate.
///
/// ```rust,ignore
/// let a = atom(2);
/// let b = computed(move || a.get() * 2);
/// a.set(5);
/// assert_eq!(b.get(), 10);
/// ```
pub fn computed<T, F>(molecule: F) -> Atom<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    derive(molecule, Atom::new)
}

/// Derive an atom from a molecule with a custom equality predicate on the
/// derived value.
pub fn computed_with_equals<T, F, E>(molecule: F, equals: E) -> Atom<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    E: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    derive(molecule, move |value| Atom::with_equals(value, equals))
}

fn derive<T, F>(molecule: F, make_atom: impl FnOnce(T) -> Atom<T>) -> Atom<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let (deps, initial) = capture(&molecule);
    let output = make_atom(initial);

    let id = ListenerId::new();
    let deps_slot = Arc::new(Mutex::new(Dependencies::default()));
    let weak_self = Arc::new(Mutex::new(None));
    let stale = Arc::new(AtomicBool::new(false));

    let driver: Arc<ListenerFn> = Arc::new({
        let weak_output = output.downgrade();
        let deps_slot = Arc::clone(&deps_slot);
        let weak_self = Arc::clone(&weak_self);
        let stale = Arc::clone(&stale);
        move || {
            let Some(inner) = weak_output.upgrade() else {
                // Every external handle is gone; stop re-deriving.
                if !stale.swap(true, Ordering::SeqCst) {
                    std::mem::take(&mut *deps_slot.lock().expect("deps lock poisoned"))
                        .disconnect(id);
                }
                return;
            };

            std::mem::take(&mut *deps_slot.lock().expect("deps lock poisoned"))
                .disconnect(id);
            let (new_deps, value) = capture(&molecule);
            let weak = weak_self
                .lock()
                .expect("weak_self lock poisoned")
                .clone();
            if let Some(weak) = weak {
                new_deps.connect(id, &weak);
            }
            *deps_slot.lock().expect("deps lock poisoned") = new_deps;

            Atom::from_inner(inner).set(value);
        }
    });

    let weak = Arc::downgrade(&driver);
    *weak_self.lock().expect("weak_self lock poisoned") = Some(weak.clone());
    deps.connect(id, &weak);
    *deps_slot.lock().expect("deps lock poisoned") = deps;

    output.retain(driver);
    output
}
