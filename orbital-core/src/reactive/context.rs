//! Dependency capture.
//!
//! The tracker keeps a thread-local stack of capture frames. While any frame
//! is active, every atom read registers itself into ALL active frames, not
//! just the innermost one, so nested captures each observe the full set of
//! atoms read on their watch.
//!
//! Frames are pushed and popped through drop guards, so the stack is restored
//! even when the tracked closure panics. Tracked code runs to completion
//! synchronously: every entry point takes a plain closure, which is what
//! rules out suspension inside tracked code in the first place.

use std::cell::RefCell;
use std::mem;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::atom::Atom;
use super::listener::{ListenerFn, ListenerId, Listeners};

/// The atoms collected by one capture frame, deduplicated by atom identity.
type Frame = SmallVec<[Arc<Listeners>; 4]>;

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// Record an atom read into every active capture frame.
///
/// Called by [`Atom::get`]; a no-op outside of any capture.
pub(crate) fn track(listeners: &Arc<Listeners>) {
    FRAMES.with(|frames| {
        for frame in frames.borrow_mut().iter_mut() {
            let seen = frame
                .iter()
                .any(|tracked| tracked.atom_id() == listeners.atom_id());
            if !seen {
                frame.push(Arc::clone(listeners));
            }
        }
    });
}

/// The set of atoms read during one tracked invocation.
///
/// Returned by [`capture`]; the subscription layer connects and disconnects
/// listeners against it wholesale.
#[derive(Default)]
pub struct Dependencies {
    tracked: Frame,
}

impl Dependencies {
    /// Number of distinct atoms in the set.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Whether the given atom was read during the capture.
    pub fn contains<T>(&self, atom: &Atom<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.tracked
            .iter()
            .any(|tracked| tracked.atom_id() == atom.id())
    }

    /// Register `callback` on every atom in the set.
    pub(crate) fn connect(&self, id: ListenerId, callback: &Weak<ListenerFn>) {
        for tracked in &self.tracked {
            tracked.connect(id, callback.clone());
        }
    }

    /// Remove the listener edge from every atom in the set.
    pub(crate) fn disconnect(&self, id: ListenerId) {
        for tracked in &self.tracked {
            tracked.disconnect(id);
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("len", &self.len())
            .finish()
    }
}

/// Guard that pops its own frame when dropped.
struct FrameGuard {
    finished: bool,
}

impl FrameGuard {
    fn push() -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(Frame::new()));
        Self { finished: false }
    }

    fn finish(mut self) -> Frame {
        self.finished = true;
        FRAMES.with(|frames| frames.borrow_mut().pop().unwrap_or_default())
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.finished {
            FRAMES.with(|frames| {
                frames.borrow_mut().pop();
            });
        }
    }
}

/// Guard that restores the capture stack snapshotted by [`peek`].
struct PeekGuard {
    saved: Vec<Frame>,
}

impl PeekGuard {
    fn clear() -> Self {
        let saved = FRAMES.with(|frames| mem::take(&mut *frames.borrow_mut()));
        Self { saved }
    }
}

impl Drop for PeekGuard {
    fn drop(&mut self) {
        let saved = mem::take(&mut self.saved);
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            let during = mem::replace(&mut *frames, saved);
            frames.extend(during);
        });
    }
}

/// Run `molecule` with dependency tracking and return what it read.
///
/// Pushes a fresh capture frame, invokes the molecule synchronously, and
/// pops the frame on return or unwind. Nested captures are independent: an
/// atom read inside a nested capture registers in every active frame.
pub fn capture<R>(molecule: impl FnOnce() -> R) -> (Dependencies, R) {
    let guard = FrameGuard::push();
    let result = molecule();
    let tracked = guard.finish();
    (Dependencies { tracked }, result)
}

/// Run `f` with dependency tracking suspended.
///
/// Every active capture frame is snapshotted and cleared for the duration of
/// the call, then restored exactly, on return or unwind, so reads inside `f`
/// never register as dependencies of any enclosing capture and tracking
/// resumes untouched afterwards. Correct under nesting.
pub fn peek<R>(f: impl FnOnce() -> R) -> R {
    let _guard = PeekGuard::clear();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::atom::atom;

    #[test]
    fn capture_collects_distinct_reads() {
        let a = atom(1);
        let b = atom(2);

        let (deps, sum) = capture(|| a.get() + b.get() + a.get());

        assert_eq!(sum, 4);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&a));
        assert!(deps.contains(&b));
    }

    #[test]
    fn capture_order_does_not_matter() {
        let a = atom(1);
        let b = atom(2);

        let (forward, _) = capture(|| (a.get(), b.get()));
        let (backward, _) = capture(|| (b.get(), a.get()));

        for deps in [&forward, &backward] {
            assert_eq!(deps.len(), 2);
            assert!(deps.contains(&a));
            assert!(deps.contains(&b));
        }
    }

    #[test]
    fn nested_captures_register_in_all_active_frames() {
        let a = atom(1);
        let b = atom(2);

        let (outer, (inner, _)) = capture(|| {
            let _ = b.get();
            capture(|| a.get())
        });

        assert_eq!(inner.len(), 1);
        assert!(inner.contains(&a));
        // The outer frame saw both its own read and the nested one.
        assert_eq!(outer.len(), 2);
        assert!(outer.contains(&a));
        assert!(outer.contains(&b));
    }

    #[test]
    fn peek_hides_reads_from_enclosing_capture() {
        let a = atom(1);
        let b = atom(2);

        let (deps, _) = capture(|| {
            let _ = a.get();
            let hidden = peek(|| b.get());
            assert_eq!(hidden, 2);
        });

        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&a));
        assert!(!deps.contains(&b));
    }

    #[test]
    fn tracking_resumes_after_peek() {
        let a = atom(1);
        let b = atom(2);

        let (deps, _) = capture(|| {
            peek(|| b.get());
            a.get()
        });

        assert!(deps.contains(&a));
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn peek_restores_frames_after_panic() {
        let a = atom(1);

        let (deps, _) = capture(|| {
            let panicked = std::panic::catch_unwind(|| peek(|| panic!("boom")));
            assert!(panicked.is_err());
            a.get()
        });

        assert!(deps.contains(&a));
    }

    #[test]
    fn capture_pops_frame_on_panic() {
        let a = atom(1);

        let panicked = std::panic::catch_unwind(|| {
            capture(|| -> i32 { panic!("boom") });
        });
        assert!(panicked.is_err());

        // The stack is clean: a fresh capture behaves normally.
        let (deps, value) = capture(|| a.get());
        assert_eq!(value, 1);
        assert_eq!(deps.len(), 1);
    }
}
