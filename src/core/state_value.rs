//! State values: the serializable shape of an active configuration.
//!
//! An atomic child of a compound state is represented by its key; compound
//! and parallel children nest as maps:
//!
//! - `"green"`: the root's active child is the atomic state `green`
//! - `{"walk": "wait"}`: compound `walk` is in its atomic child `wait`
//! - `{"left": {}, "right": {}}`: a parallel root with two atomic regions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The active configuration as a nested value.
///
/// # Example
///
/// ```rust
/// use statecraft::core::StateValue;
///
/// let value = StateValue::from_path("walk.wait");
/// assert!(value.matches(&StateValue::from_path("walk")));
/// assert!(value.matches(&StateValue::from_path("walk.wait")));
/// assert!(!value.matches(&StateValue::from_path("stop")));
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Leaf(String),
    Branch(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Convert a dot path (`"a.b.c"`) into `{"a": {"b": "c"}}`.
    pub fn from_path(path: &str) -> Self {
        let mut keys: Vec<&str> = path.split('.').collect();
        let last = keys.pop().unwrap_or_default();
        keys.into_iter()
            .rev()
            .fold(StateValue::Leaf(last.to_string()), |value, key| {
                StateValue::Branch(BTreeMap::from([(key.to_string(), value)]))
            })
    }

    /// True if `self` (the current value) is at or below `parent`.
    ///
    /// This is a pure structural comparison; a leaf key in `parent` matches
    /// any branch with that key in `self`.
    pub fn matches(&self, parent: &StateValue) -> bool {
        match (parent, self) {
            (StateValue::Leaf(p), StateValue::Leaf(c)) => p == c,
            (StateValue::Leaf(p), StateValue::Branch(c)) => c.contains_key(p),
            (StateValue::Branch(_), StateValue::Leaf(_)) => false,
            (StateValue::Branch(p), StateValue::Branch(c)) => p.iter().all(|(key, pv)| {
                c.get(key).is_some_and(|cv| cv.matches(pv))
            }),
        }
    }

    /// Flattened dot paths of every active state, parents before children.
    pub fn paths(&self) -> Vec<String> {
        fn walk(value: &StateValue, prefix: &str, out: &mut Vec<String>) {
            let join = |key: &str| {
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                }
            };
            match value {
                StateValue::Leaf(key) => out.push(join(key)),
                StateValue::Branch(map) => {
                    for (key, child) in map {
                        let path = join(key);
                        out.push(path.clone());
                        walk(child, &path, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(self, "", &mut out);
        out
    }
}

impl From<&str> for StateValue {
    fn from(path: &str) -> Self {
        StateValue::from_path(path)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(pairs: &[(&str, StateValue)]) -> StateValue {
        StateValue::Branch(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn from_path_nests_keys() {
        assert_eq!(StateValue::from_path("a"), StateValue::Leaf("a".into()));
        assert_eq!(
            StateValue::from_path("a.b.c"),
            branch(&[("a", branch(&[("b", StateValue::Leaf("c".into()))]))])
        );
    }

    #[test]
    fn leaf_matches_only_itself() {
        let value = StateValue::from_path("green");
        assert!(value.matches(&"green".into()));
        assert!(!value.matches(&"red".into()));
    }

    #[test]
    fn parallel_value_matches_each_region() {
        let value = branch(&[
            ("bold", StateValue::Leaf("on".into())),
            ("italic", StateValue::Leaf("off".into())),
        ]);

        assert!(value.matches(&"bold".into()));
        assert!(value.matches(&"bold.on".into()));
        assert!(value.matches(&"italic.off".into()));
        assert!(!value.matches(&"italic.on".into()));
        assert!(value.matches(&value.clone()));
    }

    #[test]
    fn leaf_does_not_match_deeper_parent() {
        let value = StateValue::from_path("a");
        assert!(!value.matches(&"a.b".into()));
    }

    #[test]
    fn serializes_as_plain_json() {
        let value = StateValue::from_path("walk.wait");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"walk":"wait"}"#);
        let back: StateValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn paths_lists_every_level() {
        let value = StateValue::from_path("a.b.c");
        assert_eq!(value.paths(), vec!["a", "a.b", "a.b.c"]);
    }
}
