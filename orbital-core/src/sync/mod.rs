//! State synchronization over a diff/patch protocol.
//!
//! Named atoms are registered with a [`ServerSyncer`], which records a
//! snapshot whenever one of them changes and periodically flushes the
//! accumulated history as a sequence of minimal patches. A
//! [`ClientSyncer`] on the other side replays those payloads onto its own
//! atoms inside a single batch. The transport is left to the caller: the
//! server hands [`Payload`] values to a send callback, and the client
//! accepts whatever slice of payloads arrived.

mod client;
mod patch;
mod server;
mod value;

pub use client::{ClientOptions, ClientSyncer};
pub use patch::{apply, apply_value, diff, diff_value};
pub use server::{ServerOptions, ServerSyncer};
pub use value::{from_value, to_value, validate, Key, Value};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reactive::{Atom, Subscription};

/// A top-level snapshot or patch: one entry per registered atom name.
pub type StateMap = BTreeMap<String, Value>;

/// A unit of the sync protocol, as sent across the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Full snapshot of every registered atom. Replaces client state.
    Init(StateMap),
    /// Minimal diff against the previously sent snapshot.
    Patch(StateMap),
}

impl Payload {
    /// Encode for the wire with MessagePack.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decode a wire frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Errors surfaced by the sync layer. Transport failures are the caller's
/// concern and never appear here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("syncer has not been started")]
    NotStarted,

    #[error("invalid state for atom '{name}': {reason}")]
    Validation { name: String, reason: String },

    #[error("failed to encode atom '{name}'")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode atom '{name}'")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An atom whose value can cross the sync boundary. Blanket-implemented
/// for every [`Atom`] with a serde-compatible payload, so registration is
/// just `Arc::new(my_atom.clone())`.
pub trait SyncedAtom: Send + Sync {
    /// Capture the current value as wire-form [`Value`], without tracking.
    fn snapshot(&self) -> Result<Value, serde_json::Error>;

    /// Overwrite the atom from wire-form [`Value`]. Goes through the
    /// ordinary write path, so equality gating and notification apply.
    fn hydrate(&self, value: &Value) -> Result<(), serde_json::Error>;

    /// Register a change listener on the atom itself.
    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Subscription;
}

impl<T> SyncedAtom for Atom<T>
where
    T: Serialize + serde::de::DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<Value, serde_json::Error> {
        to_value(&self.peek())
    }

    fn hydrate(&self, value: &Value) -> Result<(), serde_json::Error> {
        let next: T = from_value(value)?;
        self.set(next);
        Ok(())
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Subscription {
        Atom::watch(self, listener)
    }
}
