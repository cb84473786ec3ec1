//! Persisted snapshot format.
//!
//! A persisted machine snapshot is plain JSON: status, state value, context,
//! history, output, error and the recursively persisted children. Actor
//! references inside context are replaced with a tagged placeholder,
//! `{"xstate$$type": 1, "id": "<child id>"}`, and re-bound to the restored
//! children on the way back.

use crate::actor::{ActorRef, SnapshotStatus};
use crate::core::{StateValue, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod error;

pub use error::PersistError;

/// Key marking an actor placeholder object.
pub const ACTOR_MARKER: &str = "xstate$$type";

/// Marker value for actor references.
pub const ACTOR_TYPE: u64 = 1;

/// Serializable form of a machine snapshot.
///
/// Derived fields (active node set, tags) are rebuilt from `value` on
/// restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMachineSnapshot {
    pub status: SnapshotStatus,
    pub value: StateValue,
    pub context: serde_json::Value,
    #[serde(default)]
    pub history_value: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub children: BTreeMap<String, PersistedChild>,
}

/// One persisted child, keyed by its id in the parent's children map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChild {
    pub snapshot: serde_json::Value,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default)]
    pub sync_snapshot: bool,
}

impl PersistedMachineSnapshot {
    pub fn to_json(&self) -> Result<serde_json::Value, PersistError> {
        serde_json::to_value(self).map_err(|e| PersistError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, PersistError> {
        serde_json::from_value(json.clone()).map_err(|e| PersistError::Deserialization(e.to_string()))
    }
}

/// Render a persisted snapshot as a JSON string.
pub fn to_json_string(persisted: &serde_json::Value) -> Result<String, PersistError> {
    serde_json::to_string(persisted).map_err(|e| PersistError::Serialization(e.to_string()))
}

/// Parse a persisted snapshot from a JSON string.
pub fn from_json_str(json: &str) -> Result<serde_json::Value, PersistError> {
    serde_json::from_str(json).map_err(|e| PersistError::Deserialization(e.to_string()))
}

fn is_placeholder(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    map.get(ACTOR_MARKER).and_then(serde_json::Value::as_u64) == Some(ACTOR_TYPE)
}

/// Convert a value to JSON, replacing actor references with placeholders.
pub fn persist_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(persist_value).collect()),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), persist_value(value)))
                .collect(),
        ),
        Value::Actor(actor) => actor_placeholder(actor.id()),
    }
}

/// The placeholder an actor reference persists as.
pub fn actor_placeholder(id: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(ACTOR_MARKER.to_string(), serde_json::Value::from(ACTOR_TYPE));
    map.insert("id".to_string(), serde_json::Value::from(id));
    serde_json::Value::Object(map)
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// Convert JSON back to a value, binding placeholders to `children` by id.
/// Placeholders for children that no longer exist become `Null`.
pub fn revive_value(json: &serde_json::Value, children: &BTreeMap<String, ActorRef>) -> Value {
    match json {
        serde_json::Value::Object(map) if is_placeholder(map) => map
            .get("id")
            .and_then(serde_json::Value::as_str)
            .and_then(|id| children.get(id))
            .map_or(Value::Null, |child| Value::Actor(child.clone())),
        serde_json::Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), revive_value(value, children)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(|item| revive_value(item, children)).collect())
        }
        other => Value::from(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn persists_plain_values_unchanged() {
        let value = Value::from(json!({ "count": 3, "ratio": 0.5, "tags": ["a"], "none": null }));
        assert_eq!(
            persist_value(&value),
            json!({ "count": 3, "ratio": 0.5, "tags": ["a"], "none": null })
        );
    }

    #[test]
    fn missing_children_revive_as_null() {
        let json = json!({ "ref": actor_placeholder("gone"), "n": 1 });
        let value = revive_value(&json, &BTreeMap::new());
        assert!(value.get("ref").is_some_and(Value::is_null));
        assert_eq!(value.get("n").and_then(Value::as_i64), Some(1));
    }

    #[test]
    fn objects_with_other_marker_values_are_kept() {
        let json = json!({ "xstate$$type": 2, "id": "x" });
        let value = revive_value(&json, &BTreeMap::new());
        assert_eq!(value.get("id").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn persisted_snapshot_uses_camel_case() {
        let persisted = PersistedMachineSnapshot {
            status: SnapshotStatus::Active,
            value: StateValue::from("idle"),
            context: json!({}),
            history_value: BTreeMap::new(),
            output: None,
            error: None,
            children: BTreeMap::new(),
        };
        let json = persisted.to_json().unwrap();
        assert_eq!(json["status"], json!("active"));
        assert_eq!(json["value"], json!("idle"));
        assert!(json.get("historyValue").is_some());

        let back = PersistedMachineSnapshot::from_json(&json).unwrap();
        assert_eq!(back, persisted);
    }

    #[test]
    fn string_helpers_report_bad_json() {
        assert!(matches!(
            from_json_str("{not json"),
            Err(PersistError::Deserialization(_))
        ));
    }
}
