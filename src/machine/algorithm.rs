//! The transition engine.
//!
//! Selection walks the active configuration from the leaves up and picks at
//! most one transition per node. A *microstep* applies a conflict-free batch
//! of transitions: exit states (descending document order), transition
//! actions, enter states (ascending document order). A *macrostep* runs
//! microsteps for one external event until no eventless transition is
//! enabled and the internal queue is empty.

use crate::actor::{ActorError, ActorScope, SnapshotStatus};
use crate::core::{Event, GuardArgs, GuardScope, HistoryValue, Value, INIT_EVENT, STOP_EVENT};
use crate::effects::{Action, ActionArgs, Pass, Resolver};
use crate::machine::node::{HistoryKind, NodeId, NodeKind, TransitionDefinition};
use crate::machine::snapshot::MachineSnapshot;
use crate::machine::tree::StateTree;
use crate::machine::{ContextSource, StateMachine};
use crate::system::{InspectionEvent, TransitionSummary};
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

type Transitions = Vec<Rc<TransitionDefinition>>;

/// Transitions enabled by `event` in `snapshot`, one per node at most.
pub(crate) fn select_transitions(
    tree: &StateTree,
    snapshot: &MachineSnapshot,
    event: &Event,
) -> Result<Transitions, ActorError> {
    transition_node(tree, snapshot, NodeId::ROOT, event)
}

fn transition_node(
    tree: &StateTree,
    snapshot: &MachineSnapshot,
    node: NodeId,
    event: &Event,
) -> Result<Transitions, ActorError> {
    let active = snapshot.nodes();
    let inner = match tree.node(node).kind {
        NodeKind::Compound => match tree.regions(node).find(|child| active.contains(child)) {
            Some(child) => transition_node(tree, snapshot, child, event)?,
            None => Vec::new(),
        },
        NodeKind::Parallel => {
            let mut all = Vec::new();
            for region in tree.regions(node).filter(|child| active.contains(child)) {
                all.extend(transition_node(tree, snapshot, region, event)?);
            }
            all
        }
        _ => Vec::new(),
    };
    if !inner.is_empty() {
        return Ok(inner);
    }
    Ok(next(tree, snapshot, node, event)?.into_iter().collect())
}

/// First candidate of `node` whose guard passes.
fn next(
    tree: &StateTree,
    snapshot: &MachineSnapshot,
    node: NodeId,
    event: &Event,
) -> Result<Option<Rc<TransitionDefinition>>, ActorError> {
    for candidate in tree.candidates(node, event.event_type()).iter() {
        if guard_passes(tree, snapshot, candidate, event)? {
            return Ok(Some(candidate.clone()));
        }
    }
    Ok(None)
}

fn guard_passes(
    tree: &StateTree,
    snapshot: &MachineSnapshot,
    transition: &TransitionDefinition,
    event: &Event,
) -> Result<bool, ActorError> {
    let Some(guard) = &transition.guard else {
        return Ok(true);
    };
    let args = GuardArgs {
        context: snapshot.context(),
        event,
        params: &Value::Null,
    };
    let scope: &dyn GuardScope = snapshot;
    guard.check(&args, scope).map_err(|error| ActorError::Guard {
        guard: guard.describe(),
        event: event.event_type().to_string(),
        state: tree.node(transition.source).id.clone(),
        message: error.to_string(),
    })
}

/// Eventless transitions: for every active atomic node, the first passing
/// `always` candidate found walking from the node up to the root.
pub(crate) fn select_eventless(
    tree: &StateTree,
    snapshot: &MachineSnapshot,
    event: &Event,
) -> Result<Transitions, ActorError> {
    let mut enabled: Transitions = Vec::new();
    for leaf in snapshot.nodes().iter().copied().filter(|n| tree.node(*n).is_atomic()) {
        let lineage = std::iter::once(leaf).chain(tree.proper_ancestors(leaf, None));
        'search: for node in lineage {
            for transition in &tree.node(node).always {
                if guard_passes(tree, snapshot, transition, event)? {
                    if !enabled.iter().any(|seen| Rc::ptr_eq(seen, transition)) {
                        enabled.push(transition.clone());
                    }
                    break 'search;
                }
            }
        }
    }
    Ok(enabled)
}

pub(crate) struct Engine<'a> {
    machine: &'a StateMachine,
    tree: &'a StateTree,
    scope: &'a ActorScope,
    resolver: Resolver<'a>,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(machine: &'a StateMachine, scope: &'a ActorScope) -> Self {
        Self {
            machine,
            tree: machine.tree(),
            scope,
            resolver: Resolver::new(machine, scope),
        }
    }

    /// Context, root entry and every initial state, settled by a macrostep
    /// on `xstate.init`.
    pub(crate) fn initial_snapshot(&self, input: &Value) -> Result<Rc<MachineSnapshot>, ActorError> {
        let init = Event::init(input.clone());
        let mut queue = VecDeque::new();
        let (context, actions) = match self.machine.context_source() {
            ContextSource::Value(value) => (value.clone(), Vec::new()),
            ContextSource::Factory(factory) => (Value::object(), vec![Action::Assign(factory.clone())]),
        };
        let pre_initial = Rc::new(MachineSnapshot::new(
            self.machine.clone(),
            BTreeSet::from([NodeId::ROOT]),
            context,
        ));
        let pre_initial = self.resolver.resolve(
            pre_initial,
            &init,
            &actions,
            &mut Pass {
                queue: &mut queue,
                deferred_ids: &[],
            },
        )?;

        let bootstrap = Rc::new(TransitionDefinition {
            source: NodeId::ROOT,
            targets: Some(self.tree.initial_state_nodes(NodeId::ROOT).into_iter().collect()),
            guard: None,
            actions: Vec::new(),
            reenter: true,
            event_type: String::new(),
            description: None,
        });
        let entered = self.microstep(&[bootstrap], pre_initial, &init, true, &mut queue)?;
        self.macrostep(entered, &init, queue)
    }

    /// Settle `event` completely.
    pub(crate) fn macrostep(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        mut queue: VecDeque<Event>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        if event.event_type() == STOP_EVENT {
            let stopped = self.stop_children(snapshot, event)?.derive(|next| {
                next.status = SnapshotStatus::Stopped;
            });
            self.inspect_microstep(&stopped, event, &[]);
            return Ok(stopped);
        }

        let mut current = snapshot;
        let mut next_event = event.clone();

        if event.event_type() != INIT_EVENT {
            let transitions = select_transitions(self.tree, &current, event)?;
            if event.is_error_actor_event() && transitions.is_empty() {
                let error = event
                    .error()
                    .cloned()
                    .unwrap_or_else(|| ActorError::custom("child actor failed"));
                let errored = current.derive(|next| {
                    next.status = SnapshotStatus::Error;
                    next.error = Some(error);
                });
                self.inspect_microstep(&errored, event, &[]);
                return Ok(errored);
            }
            current = self.microstep(&transitions, current, event, false, &mut queue)?;
            self.inspect_microstep(&current, event, &transitions);
        }

        let mut select_eventless_next = true;
        while current.status == SnapshotStatus::Active {
            let mut enabled = if select_eventless_next {
                select_eventless(self.tree, &current, &next_event)?
            } else {
                Vec::new()
            };
            let previous = if enabled.is_empty() { None } else { Some(current.clone()) };
            if enabled.is_empty() {
                let Some(internal) = queue.pop_front() else {
                    break;
                };
                next_event = internal;
                enabled = select_transitions(self.tree, &current, &next_event)?;
            }
            current = self.microstep(&enabled, current, &next_event, false, &mut queue)?;
            select_eventless_next = previous.map_or(true, |previous| !Rc::ptr_eq(&previous, &current));
            self.inspect_microstep(&current, &next_event, &enabled);
        }

        if current.status != SnapshotStatus::Active {
            current = self.stop_children(current, &next_event)?;
        }
        Ok(current)
    }

    fn microstep(
        &self,
        transitions: &[Rc<TransitionDefinition>],
        current: Rc<MachineSnapshot>,
        event: &Event,
        is_initial: bool,
        queue: &mut VecDeque<Event>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        if transitions.is_empty() {
            return Ok(current);
        }
        let mut active: BTreeSet<NodeId> = current.nodes().clone();
        let mut history = current.history.clone();
        let filtered = self.remove_conflicting(transitions, &active, &history);

        let mut next = current.clone();
        if !is_initial {
            let (exited, recorded) = self.exit_states(next, event, &filtered, &mut active, history, queue)?;
            next = exited;
            history = recorded;
        }

        let actions: Vec<Action> = filtered
            .iter()
            .flat_map(|transition| transition.actions.iter().cloned())
            .collect();
        next = self.resolver.resolve(
            next,
            event,
            &actions,
            &mut Pass {
                queue: &mut *queue,
                deferred_ids: &[],
            },
        )?;

        next = self.enter_states(next, event, &filtered, &mut active, &history, is_initial, queue)?;

        if next.status == SnapshotStatus::Done {
            let exits: Vec<Action> = active
                .iter()
                .rev()
                .flat_map(|node| self.tree.node(*node).exit.iter().cloned())
                .collect();
            next = self.resolver.resolve(
                next,
                event,
                &exits,
                &mut Pass {
                    queue: &mut *queue,
                    deferred_ids: &[],
                },
            )?;
        }

        if history.same_as(&current.history) && active == *current.nodes() {
            return Ok(next);
        }
        Ok(next.derive(|snapshot| {
            snapshot.set_nodes(active);
            snapshot.history = history;
        }))
    }

    /// Keep a transition unless its exit set overlaps one already kept.
    /// A transition from a descendant source preempts one from its ancestor.
    fn remove_conflicting(
        &self,
        transitions: &[Rc<TransitionDefinition>],
        active: &BTreeSet<NodeId>,
        history: &HistoryValue,
    ) -> Transitions {
        let mut kept: Transitions = Vec::new();
        for t1 in transitions {
            let exit1 = self.exit_set(std::slice::from_ref(t1), active, history);
            let mut preempted = false;
            let mut remove: Vec<usize> = Vec::new();
            for (index, t2) in kept.iter().enumerate() {
                let exit2 = self.exit_set(std::slice::from_ref(t2), active, history);
                if exit1.is_disjoint(&exit2) {
                    continue;
                }
                if self.tree.is_descendant(t1.source, t2.source) {
                    remove.push(index);
                } else {
                    preempted = true;
                    break;
                }
            }
            if !preempted {
                for index in remove.into_iter().rev() {
                    kept.remove(index);
                }
                kept.push(t1.clone());
            }
        }
        kept.sort_by_key(|transition| transition.source);
        kept
    }

    fn exit_set(
        &self,
        transitions: &[Rc<TransitionDefinition>],
        active: &BTreeSet<NodeId>,
        history: &HistoryValue,
    ) -> BTreeSet<NodeId> {
        let mut exit = BTreeSet::new();
        for transition in transitions {
            if transition.targets.as_ref().map_or(true, Vec::is_empty) {
                continue;
            }
            let domain = self.transition_domain(transition, history);
            if transition.reenter && domain == Some(transition.source) {
                exit.insert(transition.source);
            }
            for node in active {
                let inside = match domain {
                    Some(domain) => self.tree.is_descendant(*node, domain),
                    None => true,
                };
                if inside {
                    exit.insert(*node);
                }
            }
        }
        exit
    }

    /// The compound ancestor whose descendants are exited and entered.
    /// `None` stands for a virtual node above the root.
    fn transition_domain(&self, transition: &TransitionDefinition, history: &HistoryValue) -> Option<NodeId> {
        let targets = self.effective_targets(transition.targets.as_deref().unwrap_or_default(), history);
        if targets.is_empty() {
            return Some(transition.source);
        }
        let source = transition.source;
        if !transition.reenter
            && targets
                .iter()
                .all(|target| *target == source || self.tree.is_descendant(*target, source))
        {
            return Some(source);
        }
        let mut nodes = targets;
        nodes.push(source);
        if let Some(lca) = self.tree.least_common_ancestor(&nodes) {
            return Some(lca);
        }
        if transition.reenter {
            return None;
        }
        Some(NodeId::ROOT)
    }

    /// Targets with history pseudo-states replaced by what they restore.
    fn effective_targets(&self, targets: &[NodeId], history: &HistoryValue) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for target in targets {
            let resolved = if self.tree.node(*target).kind == NodeKind::History {
                match self.recorded(*target, history) {
                    Some(recorded) => recorded,
                    None => self.effective_targets(&self.history_default(*target), history),
                }
            } else {
                vec![*target]
            };
            for node in resolved {
                if !out.contains(&node) {
                    out.push(node);
                }
            }
        }
        out
    }

    fn recorded(&self, history_node: NodeId, history: &HistoryValue) -> Option<Vec<NodeId>> {
        history.get(&self.tree.node(history_node).id).map(|ids| {
            ids.iter()
                .filter_map(|id| self.tree.get_by_id(id))
                .collect()
        })
    }

    /// Where a history state goes when nothing is recorded, and whether
    /// that is the parent's own initial transition.
    fn history_default(&self, history_node: NodeId) -> Vec<NodeId> {
        self.history_fallback(history_node).0
    }

    fn history_fallback(&self, history_node: NodeId) -> (Vec<NodeId>, bool) {
        let node = self.tree.node(history_node);
        if !node.history_default.is_empty() {
            return (node.history_default.clone(), false);
        }
        let Some(parent) = node.parent else {
            return (Vec::new(), false);
        };
        match self.tree.node(parent).kind {
            NodeKind::Parallel => (self.tree.regions(parent).collect(), false),
            _ => {
                let initial = self
                    .tree
                    .node(parent)
                    .initial
                    .as_ref()
                    .and_then(|initial| initial.targets.clone())
                    .unwrap_or_default();
                (initial, true)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exit_states(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        transitions: &[Rc<TransitionDefinition>],
        active: &mut BTreeSet<NodeId>,
        history: HistoryValue,
        queue: &mut VecDeque<Event>,
    ) -> Result<(Rc<MachineSnapshot>, HistoryValue), ActorError> {
        let exiting = self.exit_set(transitions, active, &history);

        let mut updates: Vec<(String, Vec<String>)> = Vec::new();
        for node in exiting.iter().rev() {
            for child in &self.tree.node(*node).children {
                let history_node = self.tree.node(*child);
                if history_node.kind != NodeKind::History {
                    continue;
                }
                let remembered: Vec<String> = active
                    .iter()
                    .filter(|candidate| match history_node.history {
                        HistoryKind::Deep => {
                            self.tree.node(**candidate).is_atomic() && self.tree.is_descendant(**candidate, *node)
                        }
                        HistoryKind::Shallow => self.tree.node(**candidate).parent == Some(*node),
                    })
                    .map(|candidate| self.tree.node(*candidate).id.clone())
                    .collect();
                updates.push((history_node.id.clone(), remembered));
            }
        }
        let history = history.record_all(updates);

        let mut next = snapshot;
        for node in exiting.iter().rev() {
            let state = self.tree.node(*node);
            let mut actions = state.exit.clone();
            actions.extend(state.invoke.iter().map(|invoke| invoke.stop_action()));
            next = self.resolver.resolve(
                next,
                event,
                &actions,
                &mut Pass {
                    queue: &mut *queue,
                    deferred_ids: &[],
                },
            )?;
            active.remove(node);
        }
        Ok((next, history))
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_states(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        transitions: &[Rc<TransitionDefinition>],
        active: &mut BTreeSet<NodeId>,
        history: &HistoryValue,
        is_initial: bool,
        queue: &mut VecDeque<Event>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let mut to_enter = BTreeSet::new();
        let mut default_entry = BTreeSet::new();
        self.entry_set(transitions, history, &mut default_entry, &mut to_enter);
        if is_initial {
            default_entry.insert(NodeId::ROOT);
        }

        let mut next = snapshot;
        let mut completed: BTreeSet<NodeId> = BTreeSet::new();
        for node in to_enter {
            active.insert(node);
            let state = self.tree.node(node);
            let mut actions = state.entry.clone();
            actions.extend(state.invoke.iter().map(|invoke| invoke.spawn_action()));
            if default_entry.contains(&node) {
                if let Some(initial) = &state.initial {
                    actions.extend(initial.actions.iter().cloned());
                }
            }
            next = self.resolver.resolve(
                next,
                event,
                &actions,
                &mut Pass {
                    queue: &mut *queue,
                    deferred_ids: &state.invoke_ids,
                },
            )?;

            if state.kind != NodeKind::Final {
                continue;
            }
            let parent = state.parent;
            let parent_kind = parent.map(|parent| self.tree.node(parent).kind);
            let mut marker = match parent_kind {
                Some(NodeKind::Parallel) => parent,
                _ => parent.and_then(|parent| self.tree.node(parent).parent),
            };
            let mut completion = marker.unwrap_or(node);

            if let (Some(parent), Some(NodeKind::Compound)) = (parent, parent_kind) {
                let output = self.resolve_output(node, &next, event)?;
                queue.push_back(Event::done_state(&self.tree.node(parent).id, output));
            }
            while let Some(ancestor) = marker {
                if self.tree.node(ancestor).kind != NodeKind::Parallel
                    || completed.contains(&ancestor)
                    || !self.tree.is_in_final_state(active, ancestor)
                {
                    break;
                }
                completed.insert(ancestor);
                queue.push_back(Event::done_state(&self.tree.node(ancestor).id, None));
                completion = ancestor;
                marker = self.tree.node(ancestor).parent;
            }
            if marker.is_some() {
                continue;
            }

            let output = self.machine_output(&next, event, completion)?;
            next = next.derive(|snapshot| {
                snapshot.status = SnapshotStatus::Done;
                snapshot.output = output;
            });
        }
        Ok(next)
    }

    fn entry_set(
        &self,
        transitions: &[Rc<TransitionDefinition>],
        history: &HistoryValue,
        default_entry: &mut BTreeSet<NodeId>,
        to_enter: &mut BTreeSet<NodeId>,
    ) {
        for transition in transitions {
            let domain = self.transition_domain(transition, history);
            let targets = transition.targets.as_deref().unwrap_or_default();
            for target in targets {
                let is_history = self.tree.node(*target).kind == NodeKind::History;
                if !is_history
                    && (transition.source != *target || Some(transition.source) != domain || transition.reenter)
                {
                    to_enter.insert(*target);
                    default_entry.insert(*target);
                }
                self.add_descendants(*target, history, default_entry, to_enter);
            }
            for target in self.effective_targets(targets, history) {
                let mut ancestors = match domain {
                    Some(domain) => self.tree.proper_ancestors(target, Some(domain)),
                    None => self.tree.proper_ancestors(target, None),
                };
                if let Some(domain) = domain {
                    if self.tree.node(domain).kind == NodeKind::Parallel {
                        ancestors.push(domain);
                    }
                }
                let limit = if self.tree.node(transition.source).parent.is_none() && transition.reenter {
                    None
                } else {
                    domain
                };
                self.add_ancestors(&ancestors, limit, history, default_entry, to_enter);
            }
        }
    }

    fn add_descendants(
        &self,
        node: NodeId,
        history: &HistoryValue,
        default_entry: &mut BTreeSet<NodeId>,
        to_enter: &mut BTreeSet<NodeId>,
    ) {
        let state = self.tree.node(node);
        match state.kind {
            NodeKind::History => {
                let Some(parent) = state.parent else {
                    return;
                };
                let targets = match self.recorded(node, history) {
                    Some(recorded) => recorded,
                    None => {
                        let (targets, is_parent_initial) = self.history_fallback(node);
                        if is_parent_initial {
                            default_entry.insert(parent);
                        }
                        targets
                    }
                };
                for target in &targets {
                    to_enter.insert(*target);
                    self.add_descendants(*target, history, default_entry, to_enter);
                }
                for target in &targets {
                    let ancestors = self.tree.proper_ancestors(*target, Some(parent));
                    self.add_ancestors(&ancestors, None, history, default_entry, to_enter);
                }
            }
            NodeKind::Compound => {
                let Some(initial) = state.initial.as_ref().and_then(|t| t.targets.as_ref()?.first().copied())
                else {
                    return;
                };
                if self.tree.node(initial).kind != NodeKind::History {
                    to_enter.insert(initial);
                    default_entry.insert(initial);
                }
                self.add_descendants(initial, history, default_entry, to_enter);
                let ancestors = self.tree.proper_ancestors(initial, Some(node));
                self.add_ancestors(&ancestors, None, history, default_entry, to_enter);
            }
            NodeKind::Parallel => {
                for region in self.tree.regions(node) {
                    if to_enter.iter().any(|entered| self.tree.is_descendant(*entered, region)) {
                        continue;
                    }
                    to_enter.insert(region);
                    default_entry.insert(region);
                    self.add_descendants(region, history, default_entry, to_enter);
                }
            }
            _ => {}
        }
    }

    /// Enter `ancestors` (those inside `limit`, or all when `limit` is
    /// `None`) and complete the regions of any parallel ancestor.
    fn add_ancestors(
        &self,
        ancestors: &[NodeId],
        limit: Option<NodeId>,
        history: &HistoryValue,
        default_entry: &mut BTreeSet<NodeId>,
        to_enter: &mut BTreeSet<NodeId>,
    ) {
        for ancestor in ancestors {
            if limit.map_or(true, |limit| self.tree.is_descendant(*ancestor, limit)) {
                to_enter.insert(*ancestor);
            }
            if self.tree.node(*ancestor).kind != NodeKind::Parallel {
                continue;
            }
            for region in self.tree.regions(*ancestor) {
                if to_enter.iter().any(|entered| self.tree.is_descendant(*entered, region)) {
                    continue;
                }
                to_enter.insert(region);
                self.add_descendants(region, history, default_entry, to_enter);
            }
        }
    }

    fn resolve_output(
        &self,
        node: NodeId,
        snapshot: &MachineSnapshot,
        event: &Event,
    ) -> Result<Option<Value>, ActorError> {
        let Some(output) = &self.tree.node(node).output else {
            return Ok(None);
        };
        let args = ActionArgs {
            context: snapshot.context(),
            event,
            params: &Value::Null,
            self_ref: self.scope.self_ref(),
        };
        output.eval(&args).map(Some)
    }

    /// The root's output mapper, evaluated against the done event of the
    /// node whose completion finished the machine.
    fn machine_output(
        &self,
        snapshot: &MachineSnapshot,
        event: &Event,
        completion: NodeId,
    ) -> Result<Option<Value>, ActorError> {
        let Some(output) = &self.tree.root().output else {
            return Ok(None);
        };
        let completion_output = if self.tree.node(completion).parent.is_some() {
            self.resolve_output(completion, snapshot, event)?
        } else {
            None
        };
        let done = Event::done_state(&self.tree.node(completion).id, completion_output);
        let args = ActionArgs {
            context: snapshot.context(),
            event: &done,
            params: &Value::Null,
            self_ref: self.scope.self_ref(),
        };
        output.eval(&args).map(Some)
    }

    fn stop_children(&self, snapshot: Rc<MachineSnapshot>, event: &Event) -> Result<Rc<MachineSnapshot>, ActorError> {
        let stops: Vec<Action> = snapshot
            .children()
            .values()
            .map(|child| Action::stop_child(child.clone()))
            .collect();
        let mut discarded = VecDeque::new();
        self.resolver.resolve(
            snapshot,
            event,
            &stops,
            &mut Pass {
                queue: &mut discarded,
                deferred_ids: &[],
            },
        )
    }

    fn inspect_microstep(&self, snapshot: &MachineSnapshot, event: &Event, transitions: &[Rc<TransitionDefinition>]) {
        if self.scope.self_ref().is_detached() {
            return;
        }
        let transitions = transitions
            .iter()
            .map(|transition| TransitionSummary {
                source: self.tree.node(transition.source).id.clone(),
                targets: transition
                    .targets
                    .iter()
                    .flatten()
                    .map(|target| self.tree.node(*target).id.clone())
                    .collect(),
                event_type: transition.event_type.clone(),
            })
            .collect();
        self.scope.system().emit_inspection(InspectionEvent::Microstep {
            session_id: self.scope.session_id().to_string(),
            event: event.clone(),
            value: snapshot.value().clone(),
            transitions,
        });
    }
}
