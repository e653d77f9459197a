//! The wire value tree.
//!
//! Synced state crosses the network as [`Value`]: a plain composite of
//! primitives and uniformly-keyed maps. Atoms, closures, and other values
//! with behavior attached are unrepresentable by construction; the remaining
//! legality rules (uniform key typing, finite numbers) live in [`validate`].
//!
//! The removal sentinel is its own variant, [`Value::Removed`], serialized
//! as the tagged marker `{"__removed": true}` so it stays distinguishable
//! from every legitimate application value on the wire.
//!
//! JSON arrays become `Index`-keyed maps. Going the other way, an
//! `Index`-keyed map only renders back to an array when it is dense;
//! sparse maps (as produced by diffing element removals) render as objects
//! with stringified keys, which is why patch application coerces string keys
//! back to indices against array-shaped state.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire marker key for the removal sentinel.
const REMOVED_TAG: &str = "__removed";

/// A map key: all keys within one composite must be uniformly typed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Numeric index, produced when an array is lowered into map form.
    Index(u64),
    /// String key of an ordinary object.
    Str(String),
}

impl Key {
    /// Parse a string key back into an index, as happens to array keys that
    /// crossed a string-keyed wire format.
    pub(crate) fn coerce_index(&self) -> Option<Key> {
        match self {
            Key::Str(s) => s.parse::<u64>().ok().map(Key::Index),
            Key::Index(_) => None,
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Index(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A plain composite value as carried by snapshots and patches.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<Key, Value>),
    /// The removal sentinel: marks a key deleted by a patch.
    Removed,
}

impl Value {
    pub fn is_removed(&self) -> bool {
        matches!(self, Value::Removed)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Lower a `serde_json` tree into wire form.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (Key::Index(i as u64), Value::from_json(item)))
                    .collect(),
            ),
            serde_json::Value::Object(entries) => {
                if entries.len() == 1 && entries.get(REMOVED_TAG) == Some(&serde_json::Value::Bool(true)) {
                    return Value::Removed;
                }
                Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| (Key::Str(k), Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Raise wire form back into a `serde_json` tree.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Removed => serde_json::json!({ REMOVED_TAG: true }),
            Value::Map(map) => {
                if is_dense_index_map(map) {
                    serde_json::Value::Array(map.values().map(Value::to_json).collect())
                } else {
                    serde_json::Value::Object(
                        map.iter()
                            .map(|(k, v)| (k.to_string(), v.to_json()))
                            .collect(),
                    )
                }
            }
        }
    }
}

fn is_dense_index_map(map: &BTreeMap<Key, Value>) -> bool {
    map.keys()
        .enumerate()
        .all(|(i, key)| *key == Key::Index(i as u64))
}

/// Convert any serializable state into wire form.
pub fn to_value<T: Serialize>(state: &T) -> Result<Value, serde_json::Error> {
    Ok(Value::from_json(serde_json::to_value(state)?))
}

/// Convert wire form back into typed state.
pub fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value.to_json())
}

/// Check the sync legality rules: uniform key typing per composite, finite
/// numbers, and no removal sentinel inside state.
///
/// Only consulted at the server's emit points, and only in debug builds;
/// violations are a development-time guardrail rather than a runtime
/// condition.
pub fn validate(value: &Value) -> Result<(), String> {
    match value {
        Value::Float(f) if !f.is_finite() => Err(format!("non-finite number {f}")),
        Value::Removed => Err("removal sentinel inside state".to_string()),
        Value::Map(map) => {
            let mut indexed = false;
            let mut named = false;
            for (key, entry) in map {
                match key {
                    Key::Index(_) => indexed = true,
                    Key::Str(_) => named = true,
                }
                validate(entry).map_err(|reason| format!("{key}: {reason}"))?;
            }
            if indexed && named {
                return Err("mixed string and numeric keys in one composite".to_string());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Map(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
            Value::Removed => {
                let mut state = serializer.serialize_map(Some(1))?;
                state.serialize_entry(REMOVED_TAG, &true)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a primitive, map, or removal marker")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Deserialize::deserialize(deserializer)
    }

    fn visit_bool<E: serde::de::Error>(self, value: bool) -> Result<Value, E> {
        Ok(Value::Bool(value))
    }

    fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Value, E> {
        Ok(Value::Int(value))
    }

    fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Value, E> {
        Ok(i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64)))
    }

    fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Value, E> {
        Ok(Value::Float(value))
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Value, E> {
        Ok(Value::Str(value.to_string()))
    }

    fn visit_string<E: serde::de::Error>(self, value: String) -> Result<Value, E> {
        Ok(Value::Str(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        let mut index = 0u64;
        while let Some(item) = seq.next_element::<Value>()? {
            map.insert(Key::Index(index), item);
            index += 1;
        }
        Ok(Value::Map(map))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<Key, Value>()? {
            map.insert(key, value);
        }
        if map.len() == 1 && map.get(&Key::Str(REMOVED_TAG.to_string())) == Some(&Value::Bool(true))
        {
            return Ok(Value::Removed);
        }
        Ok(Value::Map(map))
    }
}

/// Build a string-keyed [`Value::Map`] from entry pairs. Test-friendly
/// shorthand used throughout this module's tests.
#[cfg(test)]
pub(crate) fn map_value<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Key::from(k), v))
            .collect(),
    )
}
