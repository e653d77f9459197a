//! Client side of the sync protocol.
//!
//! Payloads are applied onto the client's own registered atoms through the
//! ordinary write path, inside a single batch: local subscribers observe
//! one consistent post-sync state no matter how many payloads arrived.

use std::sync::Arc;

use indexmap::IndexMap;

use super::patch::apply_value;
use super::value::Value;
use super::{Payload, SyncError, SyncedAtom};
use crate::reactive::batch;

/// Configuration for a [`ClientSyncer`].
pub struct ClientOptions {
    /// Atoms to keep in sync, keyed by the same wire names the server
    /// registered. Names present in a payload but not here are ignored.
    pub atoms: IndexMap<String, Arc<dyn SyncedAtom>>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self {
            atoms: IndexMap::new(),
        }
    }

    pub fn atom(mut self, name: impl Into<String>, atom: Arc<dyn SyncedAtom>) -> Self {
        self.atoms.insert(name.into(), atom);
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies incoming [`Payload`]s to local atoms.
pub struct ClientSyncer {
    atoms: IndexMap<String, Arc<dyn SyncedAtom>>,
}

impl ClientSyncer {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            atoms: options.atoms,
        }
    }

    /// Apply a run of payloads in order, all within one batch.
    pub fn sync(&self, payloads: &[Payload]) -> Result<(), SyncError> {
        batch(|| {
            for payload in payloads {
                match payload {
                    Payload::Init(data) => self.apply_init(data)?,
                    Payload::Patch(data) => self.apply_patch(data)?,
                }
            }
            Ok(())
        })
    }

    fn apply_init(&self, data: &super::StateMap) -> Result<(), SyncError> {
        tracing::debug!(atoms = data.len(), "applying init");
        for (name, atom) in &self.atoms {
            let Some(value) = data.get(name) else {
                continue;
            };
            atom.hydrate(value).map_err(|source| SyncError::Decode {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn apply_patch(&self, data: &super::StateMap) -> Result<(), SyncError> {
        tracing::debug!(entries = data.len(), "applying patch");
        for (name, patch_value) in data {
            let Some(atom) = self.atoms.get(name) else {
                continue;
            };
            let next = if patch_value.is_removed() {
                Value::Nil
            } else {
                let current = atom.snapshot().map_err(|source| SyncError::Encode {
                    name: name.clone(),
                    source,
                })?;
                apply_value(&current, patch_value).unwrap_or(Value::Nil)
            };
            atom.hydrate(&next).map_err(|source| SyncError::Decode {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{atom, subscribe};
    use crate::sync::{StateMap, Value};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn patch<const N: usize>(entries: [(&str, Value); N]) -> Payload {
        Payload::Patch(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<StateMap>(),
        )
    }

    #[test]
    fn init_replaces_registered_atoms() {
        let score = atom(0_i64);
        let client = ClientSyncer::new(
            ClientOptions::new().atom("score", Arc::new(score.clone())),
        );

        let mut data = StateMap::new();
        data.insert("score".to_string(), Value::Int(41));
        data.insert("unknown".to_string(), Value::Int(9));

        client.sync(&[Payload::Init(data)]).expect("sync");
        assert_eq!(score.peek(), 41);
    }

    #[test]
    fn patch_merges_into_current_value() {
        use std::collections::HashMap;

        let stats = atom(HashMap::from([
            ("health".to_string(), 100_i64),
            ("mana".to_string(), 50),
        ]));
        let client = ClientSyncer::new(
            ClientOptions::new().atom("stats", Arc::new(stats.clone())),
        );

        client
            .sync(&[patch([(
                "stats",
                crate::sync::value::map_value([("health", Value::Int(75))]),
            )])])
            .expect("sync");

        let after = stats.peek();
        assert_eq!(after.get("health"), Some(&75));
        assert_eq!(after.get("mana"), Some(&50));
    }

    #[test]
    fn several_payloads_notify_once() {
        let score = atom(0_i64);
        let fired = Arc::new(AtomicI32::new(0));

        let score_read = score.clone();
        let fired_in = fired.clone();
        let _sub = subscribe(
            move || score_read.get(),
            move |_, _| {
                fired_in.fetch_add(1, Ordering::SeqCst);
            },
        );

        let client = ClientSyncer::new(
            ClientOptions::new().atom("score", Arc::new(score.clone())),
        );
        client
            .sync(&[
                patch([("score", Value::Int(1))]),
                patch([("score", Value::Int(2))]),
                patch([("score", Value::Int(3))]),
            ])
            .expect("sync");

        assert_eq!(score.peek(), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_resets_to_nil() {
        let maybe = atom(Some(5_i64));
        let client = ClientSyncer::new(
            ClientOptions::new().atom("maybe", Arc::new(maybe.clone())),
        );

        client
            .sync(&[patch([("maybe", Value::Removed)])])
            .expect("sync");
        assert_eq!(maybe.peek(), None);
    }

    #[test]
    fn decode_failure_names_the_atom() {
        let score = atom(0_i64);
        let client = ClientSyncer::new(
            ClientOptions::new().atom("score", Arc::new(score)),
        );

        let result = client.sync(&[patch([("score", Value::Str("nope".to_string()))])]);
        match result {
            Err(SyncError::Decode { name, .. }) => assert_eq!(name, "score"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
