//! Keyed derivations over map-shaped molecules: `mapped` and `observe`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use super::atom::Atom;
use super::computed::computed;
use super::context::peek;
use super::listener::Subscription;
use super::subscribe::{subscribe, Cleanup};

/// Derive a key-value atom from a map-shaped molecule.
///
/// On every upstream change the mapper runs once per entry of the current
/// snapshot with `(&key, &value)` and returns the output entry, or `None` to
/// omit it. The returned key may differ from the input key. Entries whose
/// computed key and value are unchanged reuse the previous output value, so
/// consumers relying on shared-pointer identity see stable references across
/// iterations; stale output keys disappear because every pass rebuilds the
/// output map from the current input.
///
/// The mapper is deliberately not memoized per entry: it runs for every
/// entry on every upstream change.
pub fn mapped<K, V, U, F, M>(molecule: F, mapper: M) -> Atom<HashMap<K, U>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> HashMap<K, V> + Send + Sync + 'static,
    M: Fn(&K, &V) -> Option<(K, U)> + Send + Sync + 'static,
{
    let previous: Arc<Mutex<HashMap<K, U>>> = Arc::new(Mutex::new(HashMap::new()));

    computed(move || {
        let input = molecule();
        let mut previous = previous.lock().expect("previous lock poisoned");

        let mut next = HashMap::with_capacity(input.len());
        for (key, value) in &input {
            if let Some((out_key, out_value)) = mapper(key, value) {
                let out_value = match previous.get(&out_key) {
                    // Unchanged entry: keep the prior value's identity.
                    Some(old) if *old == out_value => old.clone(),
                    _ => out_value,
                };
                next.insert(out_key, out_value);
            }
        }

        *previous = next.clone();
        next
    })
}

/// Observe the keys of a map-shaped molecule.
///
/// For each key in the observed map, `factory(&key, &value)` is invoked
/// lazily exactly once to obtain a per-key cleanup (`None` defaults to a
/// no-op), and that cleanup is invoked exactly once when the key disappears
/// from a later snapshot. The returned [`Subscription`] tears down every
/// still-live cleanup and stops observing.
pub fn observe<K, V, F, Fac>(molecule: F, factory: Fac) -> Subscription
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> HashMap<K, V> + Send + Sync + 'static,
    Fac: FnMut(&K, &V) -> Option<Cleanup> + Send + 'static,
{
    let live: Arc<Mutex<HashMap<K, Option<Cleanup>>>> = Arc::new(Mutex::new(HashMap::new()));
    let factory = Arc::new(Mutex::new(factory));

    // Settle the initial key set before listening for changes.
    let initial = peek(&molecule);
    reconcile(&live, &factory, &initial);

    let inner = {
        let live = Arc::clone(&live);
        let factory = Arc::clone(&factory);
        subscribe(molecule, move |next, _prev| {
            reconcile(&live, &factory, next);
        })
    };

    Subscription::new(move || {
        inner.unsubscribe();
        let drained: Vec<Option<Cleanup>> = live
            .lock()
            .expect("live lock poisoned")
            .drain()
            .map(|(_, cleanup)| cleanup)
            .collect();
        for cleanup in drained.into_iter().flatten() {
            cleanup();
        }
    })
}

fn reconcile<K, V, Fac>(
    live: &Mutex<HashMap<K, Option<Cleanup>>>,
    factory: &Mutex<Fac>,
    state: &HashMap<K, V>,
) where
    K: Eq + Hash + Clone,
    Fac: FnMut(&K, &V) -> Option<Cleanup>,
{
    // Run departures first, and outside the table lock.
    let departed: Vec<Option<Cleanup>> = {
        let mut live = live.lock().expect("live lock poisoned");
        let stale: Vec<K> = live
            .keys()
            .filter(|key| !state.contains_key(*key))
            .cloned()
            .collect();
        stale.into_iter().filter_map(|key| live.remove(&key)).collect()
    };
    for cleanup in departed.into_iter().flatten() {
        cleanup();
    }

    for (key, value) in state {
        let known = live
            .lock()
            .expect("live lock poisoned")
            .contains_key(key);
        if !known {
            let cleanup = (factory.lock().expect("factory lock poisoned"))(key, value);
            live.lock()
                .expect("live lock poisoned")
                .insert(key.clone(), cleanup);
        }
    }
}
