//! Orbital Core
//!
//! This crate provides the core runtime for the Orbital reactive state
//! framework. It implements:
//!
//! - Atoms with automatic dependency tracking
//! - Derived values (computed, mapped) and subscriptions (subscribe, effect)
//! - Batched notification
//! - A diff/patch protocol for syncing named atoms across a transport
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: atoms, capture, batching, and derived values
//! - `sync`: wire values, diff/patch, and the server/client syncers
//!
//! # Example
//!
//! ```rust,ignore
//! use orbital_core::{atom, computed, subscribe};
//!
//! // Create an atom
//! let count = atom(0);
//!
//! // Create a derived value
//! let count_in = count.clone();
//! let doubled = computed(move || count_in.get() * 2);
//!
//! // Watch it change
//! let watched = doubled.clone();
//! let sub = subscribe(
//!     move || watched.get(),
//!     |next, _prev| println!("doubled is now {next}"),
//! );
//!
//! count.set(5);
//! // Subscriber runs, prints: "doubled is now 10"
//! drop(sub);
//! ```

pub mod reactive;
pub mod sync;

pub use reactive::{
    atom, batch, capture, computed, computed_with_equals, effect, is_batching, mapped, observe,
    peek, subscribe, Atom, AtomId, Cleanup, Dependencies, Subscription,
};
pub use sync::{
    ClientOptions, ClientSyncer, Payload, ServerOptions, ServerSyncer, StateMap, SyncError,
    SyncedAtom, Value,
};
