//! Standing subscriptions: `subscribe` and `effect`.
//!
//! Both follow the same state-machine shape: capture once at creation,
//! connect to the captured dependency set, and on each fire disconnect the
//! old set, re-capture by re-running the user callback, connect the new set,
//! then emit the change. The re-capture step exists because a molecule's
//! dependency set can differ between invocations (conditional reads):
//! staying subscribed to a stale set would silently miss future updates or
//! keep phantom registrations alive.
//!
//! A callback may write one of its own dependencies. The resulting
//! notification arrives while the listener is still mid-pass; it is queued
//! and replayed as a follow-up pass once the current one returns, repeating
//! until no further write arrives. Convergence is the callback's job (a
//! non-converging self-write loops forever, same as any unbounded
//! recursion).

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::context::{capture, Dependencies};
use super::listener::{ListenerFn, ListenerId, Subscription};

/// A teardown procedure returned by an effect body.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Shared bookkeeping for one standing subscription.
struct SubscriptionState {
    /// Set before teardown so a notification already in flight against the
    /// old listener closure becomes a no-op.
    disconnected: AtomicBool,
    /// Set while a listener pass is executing its callback chain.
    running: AtomicBool,
    /// Set when a notification arrives mid-pass (the callback wrote one of
    /// its own dependencies); the running pass replays instead of recursing.
    queued: AtomicBool,
    deps: Mutex<Dependencies>,
    /// Weak handle to the listener closure itself, used to re-connect after
    /// each re-capture. Populated right after the closure is built.
    weak_self: Mutex<Option<Weak<ListenerFn>>>,
}

impl SubscriptionState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            disconnected: AtomicBool::new(false),
            running: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            deps: Mutex::new(Dependencies::default()),
            weak_self: Mutex::new(None),
        })
    }

    fn take_deps(&self) -> Dependencies {
        mem::take(&mut *self.deps.lock().expect("deps lock poisoned"))
    }

    fn store_deps(&self, deps: Dependencies) {
        *self.deps.lock().expect("deps lock poisoned") = deps;
    }

    fn weak_self(&self) -> Option<Weak<ListenerFn>> {
        self.weak_self
            .lock()
            .expect("weak_self lock poisoned")
            .clone()
    }
}

/// Clears the running flag when the pass unwinds or returns.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Subscribe to a molecule's result.
///
/// The molecule runs once up front to seed the dependency set and previous
/// state. On every fire it runs again under a fresh capture; `callback`
/// receives `(new, previous)` only when the result actually changed.
///
/// The returned [`Subscription`] unsubscribes on drop; unsubscribing is
/// idempotent and safe from within the callback itself.
pub fn subscribe<T, F, C>(molecule: F, callback: C) -> Subscription
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    C: FnMut(&T, &T) + Send + 'static,
{
    let (deps, initial) = capture(&molecule);
    let id = ListenerId::new();
    let state = SubscriptionState::new();
    let previous = Arc::new(Mutex::new(initial));
    let callback = Mutex::new(callback);

    let listener: Arc<ListenerFn> = Arc::new({
        let state = Arc::clone(&state);
        let previous = Arc::clone(&previous);
        move || {
            if state.disconnected.load(Ordering::SeqCst) {
                return;
            }
            if state.running.swap(true, Ordering::SeqCst) {
                state.queued.store(true, Ordering::SeqCst);
                return;
            }
            let _running = RunGuard(&state.running);

            loop {
                state.take_deps().disconnect(id);
                let (new_deps, next) = capture(&molecule);
                if let Some(weak) = state.weak_self() {
                    new_deps.connect(id, &weak);
                }
                state.store_deps(new_deps);

                let prev = {
                    let mut previous = previous.lock().expect("previous lock poisoned");
                    if *previous == next {
                        None
                    } else {
                        Some(mem::replace(&mut *previous, next.clone()))
                    }
                };
                if let Some(prev) = prev {
                    (callback.lock().expect("callback lock poisoned"))(&next, &prev);
                }

                if state.disconnected.load(Ordering::SeqCst)
                    || !state.queued.swap(false, Ordering::SeqCst)
                {
                    break;
                }
            }
        }
    });

    let weak = Arc::downgrade(&listener);
    *state.weak_self.lock().expect("weak_self lock poisoned") = Some(weak.clone());
    deps.connect(id, &weak);
    state.store_deps(deps);

    Subscription::new(move || {
        state.disconnected.store(true, Ordering::SeqCst);
        state.take_deps().disconnect(id);
        drop(listener);
    })
}

/// Run a side-effecting callback whenever its dependencies change.
///
/// The callback runs once at creation and may return a cleanup procedure.
/// Before each re-run the previous cleanup (if any) is invoked; on
/// unsubscribe the pending cleanup runs exactly once.
pub fn effect<F>(callback: F) -> Subscription
where
    F: FnMut() -> Option<Cleanup> + Send + 'static,
{
    let id = ListenerId::new();
    let state = SubscriptionState::new();
    let pending_cleanup: Arc<Mutex<Option<Cleanup>>> = Arc::new(Mutex::new(None));
    let callback = Arc::new(Mutex::new(callback));

    let (deps, first_cleanup) = capture(|| {
        (callback.lock().expect("callback lock poisoned"))()
    });
    *pending_cleanup.lock().expect("cleanup lock poisoned") = first_cleanup;

    let listener: Arc<ListenerFn> = Arc::new({
        let state = Arc::clone(&state);
        let pending_cleanup = Arc::clone(&pending_cleanup);
        let callback = Arc::clone(&callback);
        move || {
            if state.disconnected.load(Ordering::SeqCst) {
                return;
            }
            if state.running.swap(true, Ordering::SeqCst) {
                state.queued.store(true, Ordering::SeqCst);
                return;
            }
            let _running = RunGuard(&state.running);

            loop {
                let cleanup = pending_cleanup
                    .lock()
                    .expect("cleanup lock poisoned")
                    .take();
                if let Some(cleanup) = cleanup {
                    cleanup();
                }

                state.take_deps().disconnect(id);
                let (new_deps, next_cleanup) = capture(|| {
                    (callback.lock().expect("callback lock poisoned"))()
                });
                if state.disconnected.load(Ordering::SeqCst) {
                    // Unsubscribed from within the body: the teardown found
                    // the pending slot already drained, so this run's
                    // cleanup falls to us.
                    if let Some(cleanup) = next_cleanup {
                        cleanup();
                    }
                    break;
                }
                if let Some(weak) = state.weak_self() {
                    new_deps.connect(id, &weak);
                }
                state.store_deps(new_deps);
                *pending_cleanup.lock().expect("cleanup lock poisoned") = next_cleanup;

                if !state.queued.swap(false, Ordering::SeqCst) {
                    break;
                }
            }
        }
    });

    let weak = Arc::downgrade(&listener);
    *state.weak_self.lock().expect("weak_self lock poisoned") = Some(weak.clone());
    deps.connect(id, &weak);
    state.store_deps(deps);

    Subscription::new(move || {
        state.disconnected.store(true, Ordering::SeqCst);
        state.take_deps().disconnect(id);
        let cleanup = pending_cleanup
            .lock()
            .expect("cleanup lock poisoned")
            .take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        drop(listener);
    })
}
