//! Minimal patch computation and application.
//!
//! `diff` walks two snapshots structurally and keeps only what changed;
//! removed keys are marked with the removal sentinel. `apply` replays a
//! patch onto existing state; the two are inverses, so
//! `apply(s1, diff(s1, s2))` reconstructs `s2` for any pair of snapshots.

use std::collections::BTreeMap;

use super::value::{Key, Value};
use super::StateMap;

/// Diff two values. Returns `None` when nothing changed.
pub fn diff_value(prev: &Value, next: &Value) -> Option<Value> {
    if prev == next {
        return None;
    }
    match (prev, next) {
        (Value::Map(prev_map), Value::Map(next_map)) => {
            Some(Value::Map(diff_map(prev_map, next_map)))
        }
        _ => Some(next.clone()),
    }
}

fn diff_map(prev: &BTreeMap<Key, Value>, next: &BTreeMap<Key, Value>) -> BTreeMap<Key, Value> {
    let mut patch = BTreeMap::new();

    for (key, prev_value) in prev {
        match next.get(key) {
            None => {
                patch.insert(key.clone(), Value::Removed);
            }
            Some(next_value) => {
                if let Some(changed) = diff_value(prev_value, next_value) {
                    patch.insert(key.clone(), changed);
                }
            }
        }
    }

    for (key, next_value) in next {
        if !prev.contains_key(key) {
            patch.insert(key.clone(), next_value.clone());
        }
    }

    patch
}

/// Diff two top-level snapshots keyed by synced-atom name.
pub fn diff(prev: &StateMap, next: &StateMap) -> StateMap {
    let mut patch = StateMap::new();

    for (name, prev_value) in prev {
        match next.get(name) {
            None => {
                patch.insert(name.clone(), Value::Removed);
            }
            Some(next_value) => {
                if let Some(changed) = diff_value(prev_value, next_value) {
                    patch.insert(name.clone(), changed);
                }
            }
        }
    }

    for (name, next_value) in next {
        if !prev.contains_key(name) {
            patch.insert(name.clone(), next_value.clone());
        }
    }

    patch
}

/// Apply a patch value onto existing state. Returns `None` when the patch
/// removes the value entirely.
///
/// Patches are not deep-merged onto non-composite state: unless both sides
/// are maps, the patch value replaces the state outright. Against an
/// `Index`-keyed state map, string patch keys that parse as integers are
/// coerced back to indices, since removal and insertion can turn an ordered
/// array into a gapped, string-keyed map in the wire format.
pub fn apply_value(state: &Value, patch: &Value) -> Option<Value> {
    if patch.is_removed() {
        return None;
    }
    let (Value::Map(state_map), Value::Map(patch_map)) = (state, patch) else {
        return Some(patch.clone());
    };

    let indexed = !state_map.is_empty()
        && state_map.keys().all(|key| matches!(key, Key::Index(_)));

    let mut merged = state_map.clone();
    for (key, patch_value) in patch_map {
        let key = match (indexed, key.coerce_index()) {
            (true, Some(index)) => index,
            _ => key.clone(),
        };
        let current = merged.get(&key);
        let next = match current {
            Some(current) => apply_value(current, patch_value),
            None if patch_value.is_removed() => None,
            None => Some(patch_value.clone()),
        };
        match next {
            Some(value) => {
                merged.insert(key, value);
            }
            None => {
                merged.remove(&key);
            }
        }
    }
    Some(Value::Map(merged))
}

/// Apply a top-level patch onto a snapshot.
pub fn apply(state: &StateMap, patch: &StateMap) -> StateMap {
    let mut merged = state.clone();
    for (name, patch_value) in patch {
        let next = match merged.get(name) {
            Some(current) => apply_value(current, patch_value),
            None if patch_value.is_removed() => None,
            None => Some(patch_value.clone()),
        };
        match next {
            Some(value) => {
                merged.insert(name.clone(), value);
            }
            None => {
                merged.remove(name);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::value::map_value;

    fn state<const N: usize>(entries: [(&str, Value); N]) -> StateMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn diff_keeps_only_changes() {
        let prev = state([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let next = state([
            ("a", Value::Int(1)),
            ("b", Value::Int(3)),
            ("c", Value::Int(4)),
        ]);

        let patch = diff(&prev, &next);
        assert_eq!(
            patch,
            state([("b", Value::Int(3)), ("c", Value::Int(4))])
        );
    }

    #[test]
    fn diff_marks_removed_keys() {
        let prev = state([("a", Value::Int(1))]);
        let next = state([]);

        assert_eq!(diff(&prev, &next), state([("a", Value::Removed)]));
    }

    #[test]
    fn diff_recurses_into_nested_maps() {
        let prev = state([(
            "player",
            map_value([("health", Value::Int(100)), ("mana", Value::Int(50))]),
        )]);
        let next = state([(
            "player",
            map_value([("health", Value::Int(75)), ("mana", Value::Int(50))]),
        )]);

        let patch = diff(&prev, &next);
        assert_eq!(
            patch,
            state([("player", map_value([("health", Value::Int(75))]))])
        );
    }

    #[test]
    fn apply_removes_and_inserts() {
        let current = state([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let patch = state([("b", Value::Removed), ("c", Value::Int(5))]);

        assert_eq!(
            apply(&current, &patch),
            state([("a", Value::Int(1)), ("c", Value::Int(5))])
        );
    }

    #[test]
    fn apply_replaces_non_composite_state_outright() {
        let current = Value::Int(1);
        let patch = map_value([("x", Value::Int(2))]);
        assert_eq!(apply_value(&current, &patch), Some(patch));
    }

    #[test]
    fn apply_coerces_string_keys_against_indexed_state() {
        use std::collections::BTreeMap;

        let current = Value::Map(BTreeMap::from([
            (Key::Index(0), Value::Int(10)),
            (Key::Index(1), Value::Int(20)),
        ]));
        // A patch that crossed a string-keyed wire format.
        let patch = Value::Map(BTreeMap::from([
            (Key::from("1"), Value::Int(25)),
            (Key::from("2"), Value::Int(30)),
        ]));

        let merged = apply_value(&current, &patch).expect("merged");
        assert_eq!(
            merged,
            Value::Map(BTreeMap::from([
                (Key::Index(0), Value::Int(10)),
                (Key::Index(1), Value::Int(25)),
                (Key::Index(2), Value::Int(30)),
            ]))
        );
    }

    #[test]
    fn round_trip_reconstructs_the_target() {
        let s1 = state([
            ("a", Value::Int(1)),
            (
                "nested",
                map_value([
                    ("x", Value::Str("old".to_string())),
                    ("y", Value::Bool(true)),
                ]),
            ),
            ("gone", Value::Int(9)),
        ]);
        let s2 = state([
            ("a", Value::Int(2)),
            (
                "nested",
                map_value([
                    ("x", Value::Str("new".to_string())),
                    ("z", Value::Float(0.5)),
                ]),
            ),
            ("added", Value::Nil),
        ]);

        assert_eq!(apply(&s1, &diff(&s1, &s2)), s2);
        // And the degenerate direction.
        assert_eq!(apply(&s2, &diff(&s2, &s1)), s1);
    }

    #[test]
    fn empty_diff_applies_as_identity() {
        let s = state([("a", Value::Int(1))]);
        let patch = diff(&s, &s);
        assert!(patch.is_empty());
        assert_eq!(apply(&s, &patch), s);
    }
}
