//! Immutable machine snapshots.

use crate::actor::{ActorError, ActorRef, AnySnapshot, LogicSnapshot, SnapshotStatus};
use crate::core::{Event, Guard, GuardScope, HistoryValue, StateValue, Value};
use crate::machine::algorithm::select_transitions;
use crate::machine::{NodeId, StateMachine, StateNode};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// The state of one machine actor at a point in time.
///
/// Snapshots are never mutated once shared. Every step that changes
/// something produces a new `Rc<MachineSnapshot>`; a step that changes
/// nothing hands back the very same `Rc`.
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{MachineConfig, StateConfig};
/// use statecraft::machine::Implementations;
///
/// let machine = MachineConfig::new("light")
///     .initial("green")
///     .state("green", StateConfig::new().tag("go").on("TIMER", "yellow"))
///     .state("yellow", StateConfig::new().on("TIMER", "red"))
///     .state("red", StateConfig::new().on("TIMER", "green"))
///     .build(Implementations::new())
///     .unwrap();
///
/// let green = machine.initial_state().unwrap();
/// assert!(green.matches("green"));
/// assert!(green.has_tag("go"));
/// assert!(green.can("TIMER"));
/// assert!(!green.can("FOO"));
/// ```
#[derive(Clone)]
pub struct MachineSnapshot {
    pub(crate) machine: StateMachine,
    pub(crate) nodes: Rc<BTreeSet<NodeId>>,
    pub(crate) value: StateValue,
    pub(crate) context: Value,
    pub(crate) history: HistoryValue,
    pub(crate) status: SnapshotStatus,
    pub(crate) output: Option<Value>,
    pub(crate) error: Option<ActorError>,
    pub(crate) children: BTreeMap<String, ActorRef>,
    pub(crate) tags: BTreeSet<String>,
}

impl MachineSnapshot {
    pub(crate) fn new(machine: StateMachine, nodes: BTreeSet<NodeId>, context: Value) -> Self {
        let mut snapshot = Self {
            machine,
            nodes: Rc::new(BTreeSet::new()),
            value: StateValue::Branch(BTreeMap::new()),
            context,
            history: HistoryValue::new(),
            status: SnapshotStatus::Active,
            output: None,
            error: None,
            children: BTreeMap::new(),
            tags: BTreeSet::new(),
        };
        snapshot.set_nodes(nodes);
        snapshot
    }

    /// A copy with `update` applied.
    pub(crate) fn derive(&self, update: impl FnOnce(&mut MachineSnapshot)) -> Rc<MachineSnapshot> {
        let mut next = self.clone();
        update(&mut next);
        Rc::new(next)
    }

    /// Replace the active node set, recomputing the derived value and tags.
    pub(crate) fn set_nodes(&mut self, nodes: BTreeSet<NodeId>) {
        let tree = self.machine.tree();
        self.value = tree.state_value(&nodes);
        self.tags = nodes
            .iter()
            .flat_map(|node| tree.node(*node).tags.iter().cloned())
            .collect();
        self.nodes = Rc::new(nodes);
    }

    pub(crate) fn nodes(&self) -> &BTreeSet<NodeId> {
        &self.nodes
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    pub fn history(&self) -> &HistoryValue {
        &self.history
    }

    pub fn children(&self) -> &BTreeMap<String, ActorRef> {
        &self.children
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Active state nodes in document order.
    pub fn active_nodes(&self) -> impl Iterator<Item = &StateNode> {
        let tree = self.machine.tree();
        self.nodes.iter().map(move |node| tree.node(*node))
    }

    /// True if the active configuration is at or below `value`, e.g.
    /// `"red"` or `"red.walk"`.
    pub fn matches(&self, value: impl Into<StateValue>) -> bool {
        self.value.matches(&value.into())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether `event` would select a transition that does something.
    /// A guard that fails to evaluate counts as "no".
    pub fn can(&self, event: impl Into<Event>) -> bool {
        if self.status != SnapshotStatus::Active {
            return false;
        }
        let event = event.into();
        match select_transitions(self.machine.tree(), self, &event) {
            Ok(transitions) => transitions
                .iter()
                .any(|transition| !transition.is_targetless() || !transition.actions.is_empty()),
            Err(_) => false,
        }
    }

    /// `meta` of every active node that has one, keyed by node id.
    pub fn meta(&self) -> BTreeMap<String, Value> {
        self.active_nodes()
            .filter_map(|node| node.meta().map(|meta| (node.id().to_string(), meta.clone())))
            .collect()
    }
}

impl GuardScope for MachineSnapshot {
    fn lookup_guard(&self, name: &str) -> Option<&Guard> {
        self.machine.implementations().guard(name)
    }

    fn is_in(&self, state: &str) -> bool {
        self.machine
            .tree()
            .resolve_state(state)
            .is_some_and(|node| self.nodes.contains(&node))
    }
}

impl LogicSnapshot for MachineSnapshot {
    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    fn context(&self) -> Option<&Value> {
        Some(&self.context)
    }

    fn with_error(&self, error: ActorError) -> AnySnapshot {
        self.derive(|next| {
            next.status = SnapshotStatus::Error;
            next.error = Some(error);
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Structural equality. Children compare by id, the machine is ignored.
impl PartialEq for MachineSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.context == other.context
            && self.status == other.status
            && self.output == other.output
            && self.error == other.error
            && self.history == other.history
            && self.children.keys().eq(other.children.keys())
    }
}

impl fmt::Debug for MachineSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineSnapshot")
            .field("machine", &self.machine.id())
            .field("value", &self.value)
            .field("status", &self.status)
            .field("context", &self.context)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("output", &self.output)
            .field("error", &self.error)
            .finish()
    }
}
