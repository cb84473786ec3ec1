//! Compiled machines and the logic that drives them.
//!
//! A [`StateMachine`] couples a compiled [`StateTree`] with the named
//! implementations (actions, guards, actors, delays) its configuration
//! refers to. It implements [`ActorLogic`], so it can be run as a root actor
//! or invoked and spawned as a child of another machine.

mod algorithm;
mod node;
mod snapshot;
mod tree;

pub use node::{HistoryKind, NodeId, NodeKind, StateNode, TransitionDefinition};
pub use snapshot::MachineSnapshot;
pub use tree::StateTree;

use crate::actor::{
    downcast_snapshot, ActorError, ActorLogic, ActorRef, ActorScope, AnySnapshot, Logic, LogicSnapshot,
    ProcessingStatus, SnapshotStatus, SpawnOptions,
};
use crate::checkpoint::{persist_value, revive_value, PersistError, PersistedChild, PersistedMachineSnapshot};
use crate::core::{Event, Guard, HistoryValue, StateValue, Value};
use crate::effects::{Action, AssignFn, Delay, LogicSource};
use algorithm::Engine;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

/// Where the initial context comes from.
#[derive(Clone)]
pub(crate) enum ContextSource {
    Value(Value),
    /// Runs as an `assign` against the init event, so it sees the input and
    /// may spawn children.
    Factory(AssignFn),
}

impl Default for ContextSource {
    fn default() -> Self {
        ContextSource::Value(Value::object())
    }
}

/// Named implementations referenced from a configuration.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{Guard, Value};
/// use statecraft::effects::Action;
/// use statecraft::machine::Implementations;
///
/// let impls = Implementations::new()
///     .with_guard("belowTwo", Guard::new(|args| {
///         args.context.get("count").and_then(Value::as_i64).unwrap_or(0) < 2
///     }))
///     .with_action("notify", Action::log("notified"))
///     .with_delay("short", 100);
///
/// assert!(impls.guard("belowTwo").is_some());
/// assert!(impls.action("missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Implementations {
    actions: HashMap<String, Action>,
    guards: HashMap<String, Guard>,
    actors: HashMap<String, Logic>,
    delays: HashMap<String, Delay>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, name: impl Into<String>, action: impl Into<Action>) -> Self {
        self.actions.insert(name.into(), action.into());
        self
    }

    pub fn with_guard(mut self, name: impl Into<String>, guard: Guard) -> Self {
        self.guards.insert(name.into(), guard);
        self
    }

    pub fn with_actor(mut self, name: impl Into<String>, logic: Logic) -> Self {
        self.actors.insert(name.into(), logic);
        self
    }

    pub fn with_delay(mut self, name: impl Into<String>, delay: impl Into<Delay>) -> Self {
        self.delays.insert(name.into(), delay.into());
        self
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn guard(&self, name: &str) -> Option<&Guard> {
        self.guards.get(name)
    }

    pub fn actor(&self, name: &str) -> Option<&Logic> {
        self.actors.get(name)
    }

    pub fn delay(&self, name: &str) -> Option<&Delay> {
        self.delays.get(name)
    }

    /// Entries of `other` win over entries of `self`.
    pub fn merge(mut self, other: Implementations) -> Self {
        self.actions.extend(other.actions);
        self.guards.extend(other.guards);
        self.actors.extend(other.actors);
        self.delays.extend(other.delays);
        self
    }
}

impl fmt::Debug for Implementations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementations")
            .field("actions", &sorted_keys(&self.actions))
            .field("guards", &sorted_keys(&self.guards))
            .field("actors", &sorted_keys(&self.actors))
            .field("delays", &sorted_keys(&self.delays))
            .finish()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

struct MachineInner {
    id: String,
    tree: Rc<StateTree>,
    implementations: Implementations,
    context: ContextSource,
}

/// A compiled statechart plus its implementations. Cheap to clone.
#[derive(Clone)]
pub struct StateMachine {
    inner: Rc<MachineInner>,
}

impl StateMachine {
    pub(crate) fn new(
        id: impl Into<String>,
        tree: StateTree,
        implementations: Implementations,
        context: ContextSource,
    ) -> Self {
        Self {
            inner: Rc::new(MachineInner {
                id: id.into(),
                tree: Rc::new(tree),
                implementations,
                context,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tree(&self) -> &StateTree {
        &self.inner.tree
    }

    pub fn implementations(&self) -> &Implementations {
        &self.inner.implementations
    }

    pub(crate) fn context_source(&self) -> &ContextSource {
        &self.inner.context
    }

    pub fn root(&self) -> &StateNode {
        self.inner.tree.root()
    }

    pub fn state_node(&self, id: &str) -> Option<&StateNode> {
        self.inner.tree.get_by_id(id).map(|node| self.inner.tree.node(node))
    }

    /// This machine as actor logic.
    pub fn logic(&self) -> Logic {
        Rc::new(self.clone())
    }

    /// A machine with the same tree and `implementations` merged over the
    /// current ones.
    pub fn provide(&self, implementations: Implementations) -> StateMachine {
        StateMachine {
            inner: Rc::new(MachineInner {
                id: self.inner.id.clone(),
                tree: self.inner.tree.clone(),
                implementations: self.inner.implementations.clone().merge(implementations),
                context: self.inner.context.clone(),
            }),
        }
    }

    /// The initial snapshot, computed with an inert scope: custom actions
    /// and side effects are collected but never run.
    pub fn initial_state(&self) -> Result<Rc<MachineSnapshot>, ActorError> {
        self.initial_state_with_input(Value::Null)
    }

    pub fn initial_state_with_input(&self, input: impl Into<Value>) -> Result<Rc<MachineSnapshot>, ActorError> {
        let actor = ActorRef::detached(self.logic());
        let scope = actor.scope();
        Engine::new(self, &scope).initial_snapshot(&input.into())
    }

    /// Pure transition with an inert scope. Returns `snapshot` itself when
    /// nothing changes.
    pub fn next_state(
        &self,
        snapshot: &Rc<MachineSnapshot>,
        event: impl Into<Event>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let actor = ActorRef::detached(self.logic());
        let scope = actor.scope();
        Engine::new(self, &scope).macrostep(snapshot.clone(), &event.into(), VecDeque::new())
    }

    /// A snapshot in the configuration `value` with `context`, without
    /// running any actions.
    pub fn resolve_state(
        &self,
        value: impl Into<StateValue>,
        context: Value,
    ) -> Result<Rc<MachineSnapshot>, PersistError> {
        let value = value.into();
        let nodes = self.tree().nodes_from_value(&value).map_err(|state| PersistError::UnknownState {
            machine: self.id().to_string(),
            state,
        })?;
        let mut snapshot = MachineSnapshot::new(self.clone(), nodes, context);
        if self.tree().is_in_final_state(snapshot.nodes(), NodeId::ROOT) {
            snapshot.status = SnapshotStatus::Done;
        }
        Ok(Rc::new(snapshot))
    }

    /// Logic for a child source and the name it can be persisted under.
    pub(crate) fn resolve_source(&self, src: &LogicSource) -> Result<(Logic, Option<String>), ActorError> {
        match src {
            LogicSource::Inline(logic) => Ok((logic.clone(), None)),
            LogicSource::Named(name) => self
                .lookup_logic(name)
                .map(|logic| (logic, Some(name.clone())))
                .ok_or_else(|| ActorError::LogicNotFound(name.clone())),
        }
    }

    fn lookup_logic(&self, name: &str) -> Option<Logic> {
        self.inner
            .implementations
            .actor(name)
            .or_else(|| self.inner.tree.invoke_logic(name))
            .cloned()
    }

    fn expect_snapshot(snapshot: &AnySnapshot) -> Result<Rc<MachineSnapshot>, ActorError> {
        downcast_snapshot::<MachineSnapshot>(snapshot)
            .ok_or_else(|| ActorError::custom("snapshot does not belong to a state machine"))
    }
}

impl ActorLogic for StateMachine {
    fn initial_snapshot(&self, scope: &ActorScope, input: &Value) -> Result<AnySnapshot, ActorError> {
        let snapshot: AnySnapshot = Engine::new(self, scope).initial_snapshot(input)?;
        Ok(snapshot)
    }

    fn transition(&self, snapshot: &AnySnapshot, event: &Event, scope: &ActorScope) -> Result<AnySnapshot, ActorError> {
        let current = Self::expect_snapshot(snapshot)?;
        let next: AnySnapshot = Engine::new(self, scope).macrostep(current, event, VecDeque::new())?;
        Ok(next)
    }

    fn persisted_snapshot(&self, snapshot: &AnySnapshot) -> Result<serde_json::Value, PersistError> {
        let snapshot = downcast_snapshot::<MachineSnapshot>(snapshot)
            .ok_or_else(|| PersistError::Serialization("not a machine snapshot".to_string()))?;

        let mut children = BTreeMap::new();
        for (id, child) in snapshot.children() {
            let src = child
                .src()
                .ok_or_else(|| PersistError::InlineActor { id: id.clone() })?;
            children.insert(
                id.clone(),
                PersistedChild {
                    snapshot: child.persisted_snapshot()?,
                    src: src.to_string(),
                    system_id: child.system_id().map(str::to_string),
                    sync_snapshot: child.sync_snapshot(),
                },
            );
        }

        PersistedMachineSnapshot {
            status: snapshot.status(),
            value: snapshot.value().clone(),
            context: persist_value(snapshot.context()),
            history_value: snapshot.history().entries().clone(),
            output: snapshot.output().map(persist_value),
            error: snapshot.error().map(ToString::to_string),
            children,
        }
        .to_json()
    }

    fn restore_snapshot(&self, persisted: &serde_json::Value, scope: &ActorScope) -> Result<AnySnapshot, ActorError> {
        let persisted = PersistedMachineSnapshot::from_json(persisted)?;

        let mut children = BTreeMap::new();
        for (id, child) in &persisted.children {
            let logic = self.lookup_logic(&child.src).ok_or_else(|| PersistError::UnknownSource {
                id: id.clone(),
                src: child.src.clone(),
            })?;
            let options = SpawnOptions {
                id: Some(id.clone()),
                system_id: child.system_id.clone(),
                input: Value::Null,
                sync_snapshot: child.sync_snapshot,
                src: Some(child.src.clone()),
                snapshot: Some(child.snapshot.clone()),
            };
            children.insert(id.clone(), scope.spawn(logic, options)?);
        }

        let nodes = self
            .tree()
            .nodes_from_value(&persisted.value)
            .map_err(|state| PersistError::UnknownState {
                machine: self.id().to_string(),
                state,
            })?;
        let mut snapshot = MachineSnapshot::new(self.clone(), nodes, revive_value(&persisted.context, &children));
        snapshot.status = persisted.status;
        snapshot.history = HistoryValue::from(persisted.history_value);
        snapshot.output = persisted.output.as_ref().map(|output| revive_value(output, &children));
        snapshot.error = persisted.error.map(ActorError::Custom);
        snapshot.children = children;
        tracing::debug!(machine = %self.id(), value = %snapshot.value(), "snapshot restored");
        let restored: AnySnapshot = Rc::new(snapshot);
        Ok(restored)
    }

    /// Restored children start with their parent.
    fn start(&self, snapshot: &AnySnapshot, _scope: &ActorScope) -> Result<(), ActorError> {
        let snapshot = Self::expect_snapshot(snapshot)?;
        for child in snapshot.children().values() {
            if child.status() == ProcessingStatus::NotStarted && child.snapshot().status() == SnapshotStatus::Active {
                child.start_internal();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("id", &self.inner.id)
            .field("states", &self.inner.tree.len())
            .field("implementations", &self.inner.implementations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MachineConfig, StateConfig, TransitionConfig};

    fn toggle() -> StateMachine {
        MachineConfig::new("toggle")
            .initial("off")
            .state("off", StateConfig::new().on("FLIP", "on"))
            .state("on", StateConfig::new().on("FLIP", "off"))
            .build(Implementations::new())
            .unwrap()
    }

    #[test]
    fn provide_shares_the_tree() {
        let machine = toggle();
        let provided = machine.provide(Implementations::new().with_action("x", Action::log("x")));
        assert!(Rc::ptr_eq(&machine.inner.tree, &provided.inner.tree));
        assert!(provided.implementations().action("x").is_some());
        assert!(machine.implementations().action("x").is_none());
    }

    #[test]
    fn resolve_state_rejects_unknown_states() {
        let machine = toggle();
        let on = machine.resolve_state("on", Value::object()).unwrap();
        assert!(on.matches("on"));

        let err = machine.resolve_state("sideways", Value::object()).unwrap_err();
        assert_eq!(
            err,
            PersistError::UnknownState {
                machine: "toggle".into(),
                state: "sideways".into()
            }
        );
    }

    #[test]
    fn unknown_named_source_is_logic_not_found() {
        let machine = toggle();
        let err = machine
            .resolve_source(&LogicSource::Named("nope".into()))
            .err()
            .unwrap();
        assert_eq!(err, ActorError::LogicNotFound("nope".into()));
    }

    #[test]
    fn next_state_is_pure() {
        let machine = MachineConfig::new("m")
            .initial("a")
            .state(
                "a",
                StateConfig::new().on("GO", TransitionConfig::to("b").action(Action::custom("boom", |_| {
                    panic!("side effects must not run in next_state")
                }))),
            )
            .state("b", StateConfig::new())
            .build(Implementations::new())
            .unwrap();
        let initial = machine.initial_state().unwrap();
        let next = machine.next_state(&initial, "GO").unwrap();
        assert!(next.matches("b"));
    }
}
