//! Remembered configurations of history pseudo-states.
//!
//! A `HistoryValue` maps a history node id to the ids of the states that were
//! active beneath its parent when that parent was last exited. Like every
//! snapshot field it is immutable: `record` returns a new value and leaves
//! the original untouched, so the engine can detect "history unchanged" by
//! pointer identity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Immutable map of history node id to remembered state ids.
///
/// # Example
///
/// ```rust
/// use statecraft::core::HistoryValue;
///
/// let history = HistoryValue::new();
/// let next = history.record("player.hist", vec!["player.playing".to_string()]);
///
/// assert!(history.get("player.hist").is_none()); // original unchanged
/// assert_eq!(next.get("player.hist").unwrap(), ["player.playing".to_string()]);
/// assert!(!history.same_as(&next));
/// ```
#[derive(Clone, Debug, Default)]
pub struct HistoryValue {
    entries: Rc<BTreeMap<String, Vec<String>>>,
}

impl HistoryValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a remembered configuration, returning a new history.
    pub fn record(&self, history_id: impl Into<String>, state_ids: Vec<String>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(history_id.into(), state_ids);
        Self {
            entries: Rc::new(entries),
        }
    }

    /// Record several entries at once; one allocation regardless of count.
    pub fn record_all<I>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut updates = updates.into_iter().peekable();
        if updates.peek().is_none() {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        entries.extend(updates);
        Self {
            entries: Rc::new(entries),
        }
    }

    pub fn get(&self, history_id: &str) -> Option<&[String]> {
        self.entries.get(history_id).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, Vec<String>> {
        &self.entries
    }

    /// Reference identity: true only if both share the same storage.
    pub fn same_as(&self, other: &HistoryValue) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

impl PartialEq for HistoryValue {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<BTreeMap<String, Vec<String>>> for HistoryValue {
    fn from(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            entries: Rc::new(entries),
        }
    }
}

impl Serialize for HistoryValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HistoryValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Vec<String>>::deserialize(deserializer).map(HistoryValue::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_history_is_empty() {
        let history = HistoryValue::new();
        assert!(history.is_empty());
        assert!(history.get("anything").is_none());
    }

    #[test]
    fn record_is_immutable() {
        let history = HistoryValue::new();
        let next = history.record("m.h", vec!["m.a".into()]);

        assert!(history.is_empty());
        assert_eq!(next.get("m.h"), Some(&["m.a".to_string()][..]));
    }

    #[test]
    fn record_overwrites_previous_entry() {
        let history = HistoryValue::new()
            .record("m.h", vec!["m.a".into()])
            .record("m.h", vec!["m.b".into()]);

        assert_eq!(history.get("m.h"), Some(&["m.b".to_string()][..]));
    }

    #[test]
    fn record_all_without_updates_keeps_identity() {
        let history = HistoryValue::new().record("m.h", vec![]);
        let same = history.record_all(Vec::new());
        assert!(history.same_as(&same));
    }

    #[test]
    fn clones_share_identity_but_records_do_not() {
        let history = HistoryValue::new();
        let clone = history.clone();
        assert!(history.same_as(&clone));
        assert!(!history.same_as(&history.record("x", vec![])));
    }

    #[test]
    fn history_serializes_correctly() {
        let history = HistoryValue::new().record("m.h", vec!["m.a".into(), "m.b".into()]);

        let json = serde_json::to_string(&history).unwrap();
        let deserialized: HistoryValue = serde_json::from_str(&json).unwrap();

        assert_eq!(history, deserialized);
    }
}
