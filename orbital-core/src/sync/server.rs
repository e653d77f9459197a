//! Server side of the sync protocol.
//!
//! The server watches every registered atom and appends a full snapshot to
//! an in-memory history each time one changes. On a timer tick (driven by
//! the host loop, not by us) the history is collapsed into minimal patches
//! and handed to the caller's send function.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use super::patch::diff;
use super::{Payload, StateMap, SyncError, SyncedAtom};
use crate::reactive::Subscription;

/// Configuration for a [`ServerSyncer`].
pub struct ServerOptions {
    /// Registered atoms, keyed by their wire name. Insertion order is
    /// preserved so snapshots are stable across runs.
    pub atoms: IndexMap<String, Arc<dyn SyncedAtom>>,
    /// Seconds between flushes. Zero flushes on every tick; negative
    /// disables time-driven flushing entirely.
    pub interval: f64,
    /// When set, intermediate snapshots are kept so clients can replay
    /// each observed state. When clear, only the latest state survives a
    /// flush.
    pub preserve_history: bool,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self {
            atoms: IndexMap::new(),
            interval: 0.0,
            preserve_history: false,
        }
    }

    pub fn atom(mut self, name: impl Into<String>, atom: Arc<dyn SyncedAtom>) -> Self {
        self.atoms.insert(name.into(), atom);
        self
    }

    pub fn interval(mut self, seconds: f64) -> Self {
        self.interval = seconds;
        self
    }

    pub fn preserve_history(mut self, preserve: bool) -> Self {
        self.preserve_history = preserve;
        self
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerState {
    /// Snapshot history. Index 0 is the last state a flush was diffed
    /// against; later entries are states observed since.
    snapshots: Vec<StateMap>,
    elapsed: f64,
    started: bool,
}

/// Records atom changes and emits [`Payload`]s on demand.
pub struct ServerSyncer {
    atoms: IndexMap<String, Arc<dyn SyncedAtom>>,
    interval: f64,
    preserve_history: bool,
    state: Arc<Mutex<ServerState>>,
    watches: Vec<Subscription>,
}

impl ServerSyncer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            atoms: options.atoms,
            interval: options.interval,
            preserve_history: options.preserve_history,
            state: Arc::new(Mutex::new(ServerState {
                snapshots: Vec::new(),
                elapsed: 0.0,
                started: false,
            })),
            watches: Vec::new(),
        }
    }

    /// Take a base snapshot and begin watching every registered atom.
    /// Idempotent: a second call re-bases the history but does not double
    /// up the watches.
    pub fn start(&mut self) {
        {
            let base = self.snapshot_all();
            let mut state = self.state.lock().expect("server state lock poisoned");
            state.snapshots = vec![base];
            state.elapsed = 0.0;
            if state.started {
                return;
            }
            state.started = true;
        }

        let preserve_history = self.preserve_history;
        let atoms: Arc<Vec<(String, Arc<dyn SyncedAtom>)>> = Arc::new(
            self.atoms
                .iter()
                .map(|(n, a)| (n.clone(), Arc::clone(a)))
                .collect(),
        );
        for atom in self.atoms.values() {
            let state = Arc::clone(&self.state);
            let atoms = Arc::clone(&atoms);
            let listener: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                let snap = match snapshot_atoms(&atoms) {
                    Ok(snap) => snap,
                    Err(error) => {
                        tracing::warn!(%error, "skipping snapshot");
                        return;
                    }
                };
                push_snapshot(&state, snap, preserve_history);
            });
            self.watches.push(atom.watch(listener));
        }
    }

    /// Drop all watches and the recorded history.
    pub fn stop(&mut self) {
        self.watches.clear();
        let mut state = self.state.lock().expect("server state lock poisoned");
        state.snapshots.clear();
        state.elapsed = 0.0;
        state.started = false;
    }

    /// Advance the flush timer by `dt` seconds, flushing when the
    /// configured interval has elapsed.
    pub fn tick(
        &mut self,
        dt: f64,
        send: impl FnMut(&Payload),
    ) -> Result<(), SyncError> {
        {
            let mut state = self.state.lock().expect("server state lock poisoned");
            if !state.started {
                return Err(SyncError::NotStarted);
            }
            if self.interval < 0.0 {
                return Ok(());
            }
            state.elapsed += dt;
            if state.elapsed < self.interval {
                return Ok(());
            }
        }
        self.flush(send)
    }

    /// Collapse the snapshot history into patches, one per adjacent pair,
    /// and hand each to `send`. Empty diffs are skipped. Afterwards the
    /// history is re-based on the latest state.
    pub fn flush(&mut self, mut send: impl FnMut(&Payload)) -> Result<(), SyncError> {
        let history = {
            let mut state = self.state.lock().expect("server state lock poisoned");
            if !state.started {
                return Err(SyncError::NotStarted);
            }
            state.elapsed = 0.0;
            if state.snapshots.len() < 2 {
                return Ok(());
            }
            let latest = state.snapshots[state.snapshots.len() - 1].clone();
            std::mem::replace(&mut state.snapshots, vec![latest])
        };

        #[cfg(debug_assertions)]
        for snapshot in &history {
            for (name, value) in snapshot {
                if let Err(reason) = super::value::validate(value) {
                    return Err(SyncError::Validation {
                        name: name.clone(),
                        reason,
                    });
                }
            }
        }

        let mut emitted = 0;
        for pair in history.windows(2) {
            let patch = diff(&pair[0], &pair[1]);
            if patch.is_empty() {
                continue;
            }
            send(&Payload::Patch(patch));
            emitted += 1;
        }
        tracing::trace!(snapshots = history.len(), patches = emitted, "flushed");
        Ok(())
    }

    /// Emit a full [`Payload::Init`] for a newly connected client. Freshly
    /// snapshots every atom rather than trusting the history.
    pub fn hydrate(&self, mut send: impl FnMut(&Payload)) -> Result<(), SyncError> {
        {
            let state = self.state.lock().expect("server state lock poisoned");
            if !state.started {
                return Err(SyncError::NotStarted);
            }
        }
        let snapshot = self.snapshot_all_checked()?;
        send(&Payload::Init(snapshot));
        Ok(())
    }

    fn snapshot_all(&self) -> StateMap {
        match self.snapshot_all_checked() {
            Ok(snap) => snap,
            Err(error) => {
                tracing::warn!(%error, "base snapshot incomplete");
                StateMap::new()
            }
        }
    }

    fn snapshot_all_checked(&self) -> Result<StateMap, SyncError> {
        let mut snapshot = StateMap::new();
        for (name, atom) in &self.atoms {
            let value = atom.snapshot().map_err(|source| SyncError::Encode {
                name: name.clone(),
                source,
            })?;
            snapshot.insert(name.clone(), value);
        }
        Ok(snapshot)
    }
}

fn snapshot_atoms(
    atoms: &[(String, Arc<dyn SyncedAtom>)],
) -> Result<StateMap, SyncError> {
    let mut snapshot = StateMap::new();
    for (name, atom) in atoms {
        let value = atom.snapshot().map_err(|source| SyncError::Encode {
            name: name.clone(),
            source,
        })?;
        snapshot.insert(name.clone(), value);
    }
    Ok(snapshot)
}

/// Append a snapshot to the history, subject to the history policy.
fn push_snapshot(state: &Arc<Mutex<ServerState>>, snap: StateMap, preserve_history: bool) {
    let mut state = state.lock().expect("server state lock poisoned");
    let list = &mut state.snapshots;

    // Adjacent duplicates carry no information either way.
    if list.last() == Some(&snap) {
        return;
    }

    if preserve_history {
        // A value that bounced back to its previous state within one
        // flush window collapses to nothing.
        if list.len() >= 2 && list[list.len() - 2] == snap {
            list.pop();
            return;
        }
        list.push(snap);
    } else {
        // Without history, only the base and the latest state matter.
        list.truncate(1);
        list.push(snap);
    }
}
