//! Reactive primitives.
//!
//! This module implements the core reactive system: atoms, dependency
//! capture, batched notification, derived values, and standing
//! subscriptions.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An [`Atom`] is a container for mutable state. When an atom's value is
//! read within a capture (a molecule run by [`capture`], [`computed`],
//! [`subscribe`], or [`effect`]), the atom registers itself as a dependency.
//! When the atom's value changes, all registered listeners are notified,
//! subject to the atom's equality gate.
//!
//! ## Molecules
//!
//! A molecule is a side-effect-free function of atoms. Its dependency set is
//! not declared, it is discovered: [`capture`] runs the molecule and records
//! every atom it read. Because the set can differ between runs (conditional
//! reads), the subscription layer re-captures after every fire.
//!
//! ## Batching
//!
//! [`batch`] defers notification until the outermost batch exits, collapsing
//! any number of writes into a single flush where each listener fires at
//! most once.
//!
//! # Implementation notes
//!
//! Capture and batch state are thread-local, so tracked code never observes
//! another thread's bookkeeping; the approach (sometimes called "automatic
//! dependency tracking" or "transparent reactivity") is the one used by
//! SolidJS, Vue 3, and Leptos.

mod atom;
mod batch;
mod computed;
mod context;
mod listener;
mod mapped;
mod subscribe;

pub use atom::{atom, Atom};
pub use batch::{batch, is_batching};
pub use computed::{computed, computed_with_equals};
pub use context::{capture, peek, Dependencies};
pub use listener::{AtomId, Subscription};
pub use mapped::{mapped, observe};
pub use subscribe::{effect, subscribe, Cleanup};
