//! Declarative JSON configurations.
//!
//! The JSON form mirrors the builder API. Actions, guards, delays and
//! actors are referenced by name and resolved through the
//! [`Implementations`](crate::machine::Implementations) passed to `build`.
//!
//! ```json
//! {
//!   "id": "light",
//!   "initial": "green",
//!   "states": {
//!     "green":  { "on": { "TIMER": "yellow" } },
//!     "yellow": { "after": { "500": "red" } },
//!     "red":    { "on": { "TIMER": { "target": "green", "guard": "canGo" } } }
//!   }
//! }
//! ```
//!
//! Object keys keep their document order; the first child of a state is
//! its default initial state.

use crate::builder::error::BuildError;
use crate::builder::machine::MachineConfig;
use crate::builder::state::{InvokeConfig, StateConfig};
use crate::builder::transition::TransitionConfig;
use crate::core::{Guard, Value};
use crate::effects::{Action, Delay, Expr};
use crate::machine::{HistoryKind, NodeKind};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;

/// Map entries in document order.
struct Ordered<T>(Vec<(String, T)>);

impl<T> Default for Ordered<T> {
    fn default() -> Self {
        Ordered(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Ordered<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    entries.push(entry);
                }
                Ok(Ordered(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTransition {
    Target(String),
    Full(JsonTransitionObject),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonTransitionObject {
    #[serde(default)]
    target: Option<OneOrMany<String>>,
    #[serde(default)]
    guard: Option<JsonGuard>,
    #[serde(default)]
    actions: OneOrMany<JsonAction>,
    #[serde(default)]
    reenter: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonGuard {
    Name(String),
    Full(JsonGuardObject),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonGuardObject {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    guard: Option<Box<JsonGuard>>,
    #[serde(default)]
    guards: Vec<JsonGuard>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonAction {
    Name(String),
    Full {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        params: Option<serde_json::Value>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonInvoke {
    #[serde(default)]
    id: Option<String>,
    src: String,
    #[serde(default)]
    system_id: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
    #[serde(default)]
    on_done: OneOrMany<JsonTransition>,
    #[serde(default)]
    on_error: OneOrMany<JsonTransition>,
    #[serde(default)]
    on_snapshot: OneOrMany<JsonTransition>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonState {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<NodeKind>,
    #[serde(default)]
    history: Option<HistoryKind>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    initial: Option<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
    #[serde(default)]
    states: Ordered<JsonState>,
    #[serde(default)]
    on: Ordered<OneOrMany<JsonTransition>>,
    #[serde(default)]
    always: OneOrMany<JsonTransition>,
    #[serde(default)]
    after: Ordered<OneOrMany<JsonTransition>>,
    #[serde(default)]
    on_done: OneOrMany<JsonTransition>,
    #[serde(default)]
    entry: OneOrMany<JsonAction>,
    #[serde(default)]
    exit: OneOrMany<JsonAction>,
    #[serde(default)]
    invoke: OneOrMany<JsonInvoke>,
    #[serde(default)]
    tags: OneOrMany<String>,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    meta: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<String>,
}

impl MachineConfig {
    /// Parse a JSON machine configuration. The root object's `id` names
    /// the machine and `context` gives its initial context.
    pub fn from_json(json: &str) -> Result<MachineConfig, BuildError> {
        let mut root: JsonState = serde_json::from_str(json).map_err(|e| BuildError::Json(e.to_string()))?;
        let id = root.id.take().unwrap_or_else(|| "machine".to_string());
        let context = root.context.take();

        let mut config = MachineConfig::new(id).root(state_config(root));
        if let Some(context) = context {
            config = config.context(Value::from(context));
        }
        Ok(config)
    }
}

fn state_config(json: JsonState) -> StateConfig {
    let mut state = StateConfig::new();
    state.id = json.id;
    state.kind = json.kind;
    if let Some(history) = json.history {
        state.kind = Some(NodeKind::History);
        state.history = history;
    }
    state.history_target = json.target;
    state.initial = json.initial;
    state.states = json
        .states
        .0
        .into_iter()
        .map(|(key, child)| (key, state_config(child)))
        .collect();
    state.on = json
        .on
        .0
        .into_iter()
        .flat_map(|(descriptor, transitions)| {
            transitions
                .into_vec()
                .into_iter()
                .map(move |transition| (descriptor.clone(), transition_config(transition)))
        })
        .collect();
    state.always = transitions(json.always);
    state.after = json
        .after
        .0
        .into_iter()
        .flat_map(|(key, transitions)| {
            let delay = key.parse::<u64>().map_or_else(|_| Delay::Named(key.clone()), Delay::Millis);
            transitions
                .into_vec()
                .into_iter()
                .map(move |transition| (delay.clone(), transition_config(transition)))
        })
        .collect();
    state.on_done = transitions(json.on_done);
    state.entry = json.entry.into_vec().into_iter().map(action).collect();
    state.exit = json.exit.into_vec().into_iter().map(action).collect();
    state.invoke = json.invoke.into_vec().into_iter().map(invoke_config).collect();
    state.tags = json.tags.into_vec();
    state.output = json.output.map(|output| Expr::Value(Value::from(output)));
    state.meta = json.meta.map(Value::from);
    state.description = json.description;
    state
}

fn transitions(json: OneOrMany<JsonTransition>) -> Vec<TransitionConfig> {
    json.into_vec().into_iter().map(transition_config).collect()
}

fn transition_config(json: JsonTransition) -> TransitionConfig {
    match json {
        JsonTransition::Target(target) => TransitionConfig::to(target),
        JsonTransition::Full(object) => {
            let mut transition = TransitionConfig::targetless()
                .actions(object.actions.into_vec().into_iter().map(action))
                .reenter(object.reenter);
            for target in object.target.map(OneOrMany::into_vec).unwrap_or_default() {
                transition = transition.target(target);
            }
            if let Some(guard) = object.guard {
                transition = transition.guard(guard_config(guard));
            }
            if let Some(description) = object.description {
                transition = transition.description(description);
            }
            transition
        }
    }
}

fn guard_config(json: JsonGuard) -> Guard {
    match json {
        JsonGuard::Name(name) => Guard::named(name),
        JsonGuard::Full(object) => match object.kind.as_str() {
            "stateIn" => Guard::state_in(object.state.unwrap_or_default()),
            "not" => match object.guard {
                Some(inner) => Guard::not(guard_config(*inner)),
                None => Guard::not(Guard::and(Vec::new())),
            },
            "and" => Guard::and(object.guards.into_iter().map(guard_config).collect()),
            "or" => Guard::or(object.guards.into_iter().map(guard_config).collect()),
            _ => match object.params {
                Some(params) => Guard::named_with(object.kind, Value::from(params)),
                None => Guard::named(object.kind),
            },
        },
    }
}

fn action(json: JsonAction) -> Action {
    match json {
        JsonAction::Name(name) => Action::named(name),
        JsonAction::Full { kind, params } => match params {
            Some(params) => Action::named_with(kind, Value::from(params)),
            None => Action::named(kind),
        },
    }
}

fn invoke_config(json: JsonInvoke) -> InvokeConfig {
    let mut invoke = InvokeConfig::new(json.src);
    invoke.id = json.id;
    invoke.system_id = json.system_id;
    invoke.input = json.input.map(|input| Expr::Value(Value::from(input)));
    invoke.on_done = transitions(json.on_done);
    invoke.on_error = transitions(json.on_error);
    invoke.on_snapshot = transitions(json.on_snapshot);
    invoke
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Implementations;

    #[test]
    fn children_keep_document_order() {
        let config = MachineConfig::from_json(
            r#"{ "id": "m", "states": { "zeta": {}, "alpha": {}, "mid": {} } }"#,
        )
        .unwrap();
        let machine = config.build(Implementations::new()).unwrap();
        let keys: Vec<&str> = machine.tree().nodes().skip(1).map(|node| node.key()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert!(machine.initial_state().unwrap().matches("zeta"));
    }

    #[test]
    fn transitions_accept_strings_objects_and_lists() {
        let config = MachineConfig::from_json(
            r#"{
                "id": "m",
                "initial": "a",
                "states": {
                    "a": { "on": {
                        "GO": "b",
                        "MAYBE": [
                            { "target": "b", "guard": "never" },
                            { "actions": ["note", { "type": "track", "params": { "n": 1 } }] }
                        ]
                    } },
                    "b": { "type": "final" }
                }
            }"#,
        )
        .unwrap();
        let a = &config.root.states[0].1;
        assert_eq!(a.on.len(), 3);
        assert_eq!(a.on[0].0, "GO");
        assert_eq!(a.on[1].1.targets, vec!["b".to_string()]);
        assert!(a.on[1].1.guard.is_some());
        assert_eq!(a.on[2].1.actions.len(), 2);
        assert_eq!(config.root.states[1].1.kind, Some(NodeKind::Final));
    }

    #[test]
    fn after_keys_become_delays() {
        let config = MachineConfig::from_json(
            r#"{ "states": { "wait": { "after": { "250": "done", "slow": "done" } }, "done": {} } }"#,
        )
        .unwrap();
        let wait = &config.root.states[0].1;
        assert!(matches!(wait.after[0].0, Delay::Millis(250)));
        assert!(matches!(&wait.after[1].0, Delay::Named(name) if name == "slow"));
        assert_eq!(config.id(), "machine");
    }

    #[test]
    fn history_states_and_context() {
        let config = MachineConfig::from_json(
            r#"{
                "id": "player",
                "context": { "volume": 3 },
                "states": {
                    "on": { "states": { "a": {}, "b": {}, "hist": { "history": "deep" } } },
                    "off": {}
                }
            }"#,
        )
        .unwrap();
        let hist = &config.root.states[0].1.states[2].1;
        assert_eq!(hist.kind, Some(NodeKind::History));
        assert_eq!(hist.history, HistoryKind::Deep);

        let machine = config.build(Implementations::new()).unwrap();
        let snapshot = machine.initial_state().unwrap();
        assert_eq!(snapshot.context().get("volume").and_then(Value::as_i64), Some(3));
    }

    #[test]
    fn malformed_json_is_a_build_error() {
        let err = MachineConfig::from_json(r#"{ "states": { "a": { "bogus": 1 } } }"#).unwrap_err();
        assert!(matches!(err, BuildError::Json(_)));
    }
}
