//! Compiled state nodes and transition definitions.

use crate::core::{Guard, Value};
use crate::effects::{Action, Expr, LogicSource, SpawnAction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Index of a node in its tree. Ids are assigned in document order, so
/// comparing two ids compares their document position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    Shallow,
    Deep,
}

/// A transition after target resolution. Shared between the node's
/// candidate table and the snapshots that select it.
pub struct TransitionDefinition {
    pub(crate) source: NodeId,
    /// `None` for targetless transitions.
    pub(crate) targets: Option<Vec<NodeId>>,
    pub(crate) guard: Option<Guard>,
    pub(crate) actions: Vec<Action>,
    pub(crate) reenter: bool,
    pub(crate) event_type: String,
    pub(crate) description: Option<String>,
}

impl TransitionDefinition {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_targetless(&self) -> bool {
        self.targets.is_none()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Debug for TransitionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDefinition")
            .field("source", &self.source)
            .field("targets", &self.targets)
            .field("guard", &self.guard)
            .field("actions", &self.actions)
            .field("reenter", &self.reenter)
            .field("event_type", &self.event_type)
            .finish()
    }
}

/// A compiled invocation. Inline logic has already been registered on the
/// tree under a generated name, so `src` is always a name.
#[derive(Clone, Debug)]
pub(crate) struct InvokeDefinition {
    pub(crate) id: String,
    pub(crate) src: String,
    pub(crate) system_id: Option<String>,
    pub(crate) input: Option<Expr<Value>>,
    pub(crate) sync_snapshot: bool,
}

impl InvokeDefinition {
    pub(crate) fn spawn_action(&self) -> Action {
        Action::SpawnChild(SpawnAction {
            src: LogicSource::Named(self.src.clone()),
            id: Some(self.id.clone()),
            system_id: self.system_id.clone(),
            input: self.input.clone(),
            sync_snapshot: self.sync_snapshot,
        })
    }

    pub(crate) fn stop_action(&self) -> Action {
        Action::stop_child(self.id.as_str())
    }
}

/// One node of a compiled state tree.
#[derive(Debug)]
pub struct StateNode {
    pub(crate) id: String,
    pub(crate) key: String,
    pub(crate) kind: NodeKind,
    pub(crate) history: HistoryKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) entry: Vec<Action>,
    pub(crate) exit: Vec<Action>,
    pub(crate) invoke: Vec<InvokeDefinition>,
    pub(crate) invoke_ids: Vec<String>,
    /// Descriptor to candidates, in configuration order.
    pub(crate) on: Vec<(String, Vec<Rc<TransitionDefinition>>)>,
    pub(crate) always: Vec<Rc<TransitionDefinition>>,
    pub(crate) initial: Option<Rc<TransitionDefinition>>,
    /// Explicit default of a history node. Empty means "the parent's
    /// initial state".
    pub(crate) history_default: Vec<NodeId>,
    pub(crate) tags: Vec<String>,
    pub(crate) output: Option<Expr<Value>>,
    pub(crate) meta: Option<Value>,
    pub(crate) description: Option<String>,
}

impl StateNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Event descriptors this node has transitions for.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.on.iter().map(|(descriptor, _)| descriptor.as_str())
    }

    /// Atomic and final nodes have no active children.
    pub(crate) fn is_atomic(&self) -> bool {
        matches!(self.kind, NodeKind::Atomic | NodeKind::Final)
    }
}
