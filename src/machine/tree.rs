//! The compiled state tree.
//!
//! Nodes live in an arena indexed by [`NodeId`] in document order. The tree
//! is built in two passes: the first allocates every node so that ids can
//! be resolved, the second resolves transition targets. Every problem found
//! along the way is accumulated rather than reported one at a time.

use crate::actor::Logic;
use crate::builder::{BuildError, ConfigIssue, StateConfig, TransitionConfig};
use crate::core::{descriptor_matches, has_infix_wildcard, Event, StateValue, WILDCARD};
use crate::effects::{Action, Expr, LogicSource};
use crate::machine::node::{InvokeDefinition, NodeId, NodeKind, StateNode, TransitionDefinition};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<ConfigIssue>>;
type Candidates = Rc<Vec<Rc<TransitionDefinition>>>;

fn check(ok: bool, issue: impl FnOnce() -> ConfigIssue) -> Check {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(issue())
    }
}

pub struct StateTree {
    nodes: Vec<StateNode>,
    by_id: HashMap<String, NodeId>,
    invoke_logic: HashMap<String, Logic>,
    candidates: RefCell<HashMap<(NodeId, String), Candidates>>,
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("StateTree").field("nodes", &self.nodes.len()).field("ids", &ids).finish_non_exhaustive()
    }
}

impl StateTree {
    /// Compile a configuration rooted at `root`.
    pub(crate) fn compile(machine_id: &str, root: &StateConfig) -> Result<StateTree, BuildError> {
        let mut tree = StateTree {
            nodes: Vec::new(),
            by_id: HashMap::new(),
            invoke_logic: HashMap::new(),
            candidates: RefCell::new(HashMap::new()),
        };
        let mut checks: Vec<Check> = Vec::new();
        let mut configs: Vec<&StateConfig> = Vec::new();

        tree.allocate(machine_id, machine_id, Vec::new(), root, None, &mut configs, &mut checks);
        for (index, config) in configs.iter().enumerate() {
            tree.link(NodeId(index), config, &mut checks);
        }

        match Validation::all_vec(checks).map(|_| ()) {
            Validation::Success(()) => {
                tracing::debug!(machine = %machine_id, nodes = tree.nodes.len(), "state tree compiled");
                Ok(tree)
            }
            Validation::Failure(issues) => Err(BuildError::Invalid(issues.iter().cloned().collect())),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate<'c>(
        &mut self,
        machine_id: &str,
        key: &str,
        path: Vec<String>,
        config: &'c StateConfig,
        parent: Option<NodeId>,
        configs: &mut Vec<&'c StateConfig>,
        checks: &mut Vec<Check>,
    ) -> NodeId {
        let node_id = NodeId(self.nodes.len());
        let id = config.id.clone().unwrap_or_else(|| {
            std::iter::once(machine_id.to_string())
                .chain(path.iter().cloned())
                .collect::<Vec<_>>()
                .join(".")
        });
        let kind = config.kind.unwrap_or(if config.states.is_empty() {
            NodeKind::Atomic
        } else {
            NodeKind::Compound
        });

        checks.push(check(!self.by_id.contains_key(&id), || ConfigIssue::DuplicateId {
            id: id.clone(),
        }));
        checks.push(check(
            !(kind == NodeKind::Final && !config.states.is_empty()),
            || ConfigIssue::FinalWithChildren { state: id.clone() },
        ));
        checks.push(check(
            !(kind == NodeKind::History && !config.states.is_empty()),
            || ConfigIssue::HistoryWithChildren { state: id.clone() },
        ));
        checks.push(check(
            !(kind == NodeKind::History && parent.is_none()),
            || ConfigIssue::RootHistory { state: id.clone() },
        ));
        checks.push(check(
            !(kind == NodeKind::Parallel && config.initial.is_some()),
            || ConfigIssue::ParallelInitial { state: id.clone() },
        ));

        self.by_id.entry(id.clone()).or_insert(node_id);
        self.nodes.push(StateNode {
            id,
            key: key.to_string(),
            kind,
            history: config.history,
            parent,
            children: Vec::new(),
            entry: config.entry.clone(),
            exit: config.exit.clone(),
            invoke: Vec::new(),
            invoke_ids: Vec::new(),
            on: Vec::new(),
            always: Vec::new(),
            initial: None,
            history_default: Vec::new(),
            tags: config.tags.clone(),
            output: config.output.clone(),
            meta: config.meta.clone(),
            description: config.description.clone(),
        });
        configs.push(config);

        for (child_key, child_config) in &config.states {
            let mut child_path = path.clone();
            child_path.push(child_key.clone());
            let child = self.allocate(
                machine_id,
                child_key,
                child_path,
                child_config,
                Some(node_id),
                configs,
                checks,
            );
            self.nodes[node_id.0].children.push(child);
        }
        node_id
    }

    /// Resolve everything that refers to other nodes.
    fn link(&mut self, node: NodeId, config: &StateConfig, checks: &mut Vec<Check>) {
        let state_id = self.nodes[node.0].id.clone();
        let kind = self.nodes[node.0].kind;
        let mut on: Vec<(String, Vec<Rc<TransitionDefinition>>)> = Vec::new();
        let mut entry = Vec::new();
        let mut exit = Vec::new();

        if kind == NodeKind::Compound {
            let initial = match &config.initial {
                Some(key) => {
                    let found = self.child_by_key(node, key);
                    checks.push(check(found.is_some(), || ConfigIssue::UnknownInitial {
                        state: state_id.clone(),
                        initial: key.clone(),
                    }));
                    found
                }
                None => {
                    let found = self.nodes[node.0]
                        .children
                        .iter()
                        .copied()
                        .find(|child| self.nodes[child.0].kind != NodeKind::History);
                    checks.push(check(found.is_some(), || ConfigIssue::MissingInitial {
                        state: state_id.clone(),
                    }));
                    found
                }
            };
            if let Some(target) = initial {
                self.nodes[node.0].initial = Some(Rc::new(TransitionDefinition {
                    source: node,
                    targets: Some(vec![target]),
                    guard: None,
                    actions: config.initial_actions.clone(),
                    reenter: false,
                    event_type: String::new(),
                    description: None,
                }));
            }
        }

        if kind == NodeKind::History {
            if let (Some(target), Some(parent)) = (&config.history_target, self.nodes[node.0].parent) {
                match self.resolve_path(parent, target) {
                    Some(resolved) => self.nodes[node.0].history_default = vec![resolved],
                    None => checks.push(Validation::fail(ConfigIssue::UnknownTarget {
                        state: state_id.clone(),
                        event: "history".to_string(),
                        target: target.clone(),
                    })),
                }
            }
        }

        for (descriptor, transition) in &config.on {
            checks.push(check(!has_infix_wildcard(descriptor), || ConfigIssue::InfixWildcard {
                state: state_id.clone(),
                descriptor: descriptor.clone(),
            }));
            let compiled = self.transition(node, descriptor, transition, checks);
            push_candidate(&mut on, descriptor, compiled);
        }

        let done_type = Event::done_state_type(&state_id);
        for transition in &config.on_done {
            let compiled = self.transition(node, &done_type, transition, checks);
            push_candidate(&mut on, &done_type, compiled);
        }

        let mut invoke = Vec::new();
        for (index, invoke_config) in config.invoke.iter().enumerate() {
            let id = invoke_config
                .id
                .clone()
                .unwrap_or_else(|| format!("{state_id}[{index}]"));
            let src = match &invoke_config.src {
                LogicSource::Named(name) => name.clone(),
                LogicSource::Inline(logic) => {
                    let name = format!("xstate.invoke.{index}.{state_id}");
                    self.invoke_logic.insert(name.clone(), logic.clone());
                    name
                }
            };
            let handlers = [
                (Event::done_actor_type(&id), &invoke_config.on_done),
                (Event::error_actor_type(&id), &invoke_config.on_error),
                (Event::snapshot_type(&id), &invoke_config.on_snapshot),
            ];
            for (event_type, transitions) in handlers {
                for transition in transitions {
                    let compiled = self.transition(node, &event_type, transition, checks);
                    push_candidate(&mut on, &event_type, compiled);
                }
            }
            invoke.push(InvokeDefinition {
                id,
                src,
                system_id: invoke_config.system_id.clone(),
                input: invoke_config.input.clone(),
                sync_snapshot: !invoke_config.on_snapshot.is_empty(),
            });
        }

        for (index, (delay, transition)) in config.after.iter().enumerate() {
            let event_type = Event::after_type(&delay.key(index), &state_id);
            let compiled = self.transition(node, &event_type, transition, checks);
            push_candidate(&mut on, &event_type, compiled);
            entry.push(Action::Raise {
                event: Expr::Value(Event::new(event_type.as_str())),
                delay: Some(delay.clone()),
                id: Some(event_type.clone()),
            });
            exit.push(Action::cancel(event_type.as_str()));
        }

        let always: Vec<Rc<TransitionDefinition>> = config
            .always
            .iter()
            .map(|transition| Rc::new(self.transition(node, "", transition, checks)))
            .collect();

        let state = &mut self.nodes[node.0];
        state.on = on;
        state.always = always;
        state.entry.extend(entry);
        state.exit.extend(exit);
        state.invoke_ids = invoke.iter().map(|definition| definition.id.clone()).collect();
        state.invoke = invoke;
    }

    fn transition(
        &self,
        source: NodeId,
        event_type: &str,
        config: &TransitionConfig,
        checks: &mut Vec<Check>,
    ) -> TransitionDefinition {
        let mut targets = Vec::new();
        for target in &config.targets {
            match self.resolve_target(source, target) {
                Some(resolved) => targets.push(resolved),
                None => checks.push(Validation::fail(ConfigIssue::UnknownTarget {
                    state: self.nodes[source.0].id.clone(),
                    event: event_type.to_string(),
                    target: target.clone(),
                })),
            }
        }
        TransitionDefinition {
            source,
            targets: if config.targets.is_empty() { None } else { Some(targets) },
            guard: config.guard.clone(),
            actions: config.actions.clone(),
            reenter: config.reenter,
            event_type: event_type.to_string(),
            description: config.description.clone(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub(crate) fn root(&self) -> &StateNode {
        &self.nodes[NodeId::ROOT.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StateNode> {
        self.nodes.iter()
    }

    pub(crate) fn get_by_id(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    pub(crate) fn invoke_logic(&self, name: &str) -> Option<&Logic> {
        self.invoke_logic.get(name)
    }

    fn child_by_key(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].key == key)
    }

    /// Walk a dot path of keys down from `from`.
    pub(crate) fn resolve_path(&self, from: NodeId, path: &str) -> Option<NodeId> {
        path.split('.')
            .filter(|key| !key.is_empty())
            .try_fold(from, |node, key| self.child_by_key(node, key))
    }

    /// `"#id"` or `"#id.child"`. Ids may contain dots, so the longest
    /// matching id prefix wins.
    fn resolve_reference(&self, reference: &str) -> Option<NodeId> {
        if let Some(node) = self.get_by_id(reference) {
            return Some(node);
        }
        reference
            .char_indices()
            .rev()
            .filter(|(_, c)| *c == '.')
            .find_map(|(index, _)| {
                let node = self.get_by_id(&reference[..index])?;
                self.resolve_path(node, &reference[index + 1..])
            })
    }

    /// Resolve a transition target written on `source`.
    pub(crate) fn resolve_target(&self, source: NodeId, target: &str) -> Option<NodeId> {
        if let Some(reference) = target.strip_prefix('#') {
            return self.resolve_reference(reference);
        }
        if let Some(relative) = target.strip_prefix('.') {
            return self.resolve_path(source, relative);
        }
        match self.nodes[source.0].parent {
            Some(parent) => self.resolve_path(parent, target),
            None => self.resolve_path(source, target),
        }
    }

    /// A state reference used by `state_in` guards: an `#id` or a dot path
    /// from the root.
    pub(crate) fn resolve_state(&self, state: &str) -> Option<NodeId> {
        match state.strip_prefix('#') {
            Some(reference) => self.resolve_reference(reference),
            None => self.resolve_path(NodeId::ROOT, state),
        }
    }

    /// Strict descendant check.
    pub(crate) fn is_descendant(&self, child: NodeId, ancestor: NodeId) -> bool {
        let mut marker = self.nodes[child.0].parent;
        while let Some(node) = marker {
            if node == ancestor {
                return true;
            }
            marker = self.nodes[node.0].parent;
        }
        false
    }

    /// Ancestors of `node`, nearest first, stopping before `until`. With
    /// `until == None` every ancestor up to the root is returned.
    pub(crate) fn proper_ancestors(&self, node: NodeId, until: Option<NodeId>) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        if until == Some(node) {
            return ancestors;
        }
        let mut marker = self.nodes[node.0].parent;
        while let Some(ancestor) = marker {
            if Some(ancestor) == until {
                break;
            }
            ancestors.push(ancestor);
            marker = self.nodes[ancestor.0].parent;
        }
        ancestors
    }

    pub(crate) fn least_common_ancestor(&self, nodes: &[NodeId]) -> Option<NodeId> {
        let (head, tail) = nodes.split_first()?;
        self.proper_ancestors(*head, None)
            .into_iter()
            .find(|ancestor| tail.iter().all(|node| self.is_descendant(*node, *ancestor)))
    }

    /// Children that can be active (history pseudo-states excluded).
    pub(crate) fn regions(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(|child| self.nodes[child.0].kind != NodeKind::History)
    }

    pub(crate) fn is_in_final_state(&self, active: &BTreeSet<NodeId>, node: NodeId) -> bool {
        match self.nodes[node.0].kind {
            NodeKind::Compound => self
                .regions(node)
                .any(|child| self.nodes[child.0].kind == NodeKind::Final && active.contains(&child)),
            NodeKind::Parallel => self.regions(node).all(|child| self.is_in_final_state(active, child)),
            NodeKind::Final => true,
            _ => false,
        }
    }

    /// `node` plus every node entered by following initial states down.
    pub(crate) fn initial_state_nodes(&self, node: NodeId) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if !out.insert(current) {
                continue;
            }
            let state = &self.nodes[current.0];
            match state.kind {
                NodeKind::Compound => pending.extend(
                    state
                        .initial
                        .as_ref()
                        .and_then(|initial| initial.targets.as_ref())
                        .into_iter()
                        .flatten()
                        .copied(),
                ),
                NodeKind::Parallel => pending.extend(self.regions(current)),
                NodeKind::History => pending.extend(self.history_fallback(current)),
                _ => {}
            }
        }
        out.retain(|node| self.nodes[node.0].kind != NodeKind::History);
        out
    }

    /// Default entry for a history node with nothing recorded, used when a
    /// configuration is completed without a history value.
    fn history_fallback(&self, history: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[history.0];
        if !node.history_default.is_empty() {
            return node.history_default.clone();
        }
        match node.parent {
            Some(parent) if self.nodes[parent.0].kind == NodeKind::Parallel => self.regions(parent).collect(),
            Some(parent) => self.regions(parent).take(1).collect(),
            None => Vec::new(),
        }
    }

    /// Close a node set under "default descendants" and "all ancestors".
    pub(crate) fn complete(&self, nodes: BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let mut set = nodes;
        let mut pending: Vec<NodeId> = set.iter().copied().collect();
        while let Some(node) = pending.pop() {
            let missing: Vec<NodeId> = match self.nodes[node.0].kind {
                NodeKind::Compound
                    if !self.nodes[node.0].children.iter().any(|child| set.contains(child)) =>
                {
                    self.initial_state_nodes(node).into_iter().collect()
                }
                NodeKind::Parallel => self
                    .regions(node)
                    .filter(|child| !set.contains(child))
                    .flat_map(|child| self.initial_state_nodes(child))
                    .collect(),
                _ => Vec::new(),
            };
            for added in missing {
                if set.insert(added) {
                    pending.push(added);
                }
            }
        }
        let leaves: Vec<NodeId> = set.iter().copied().collect();
        for node in leaves {
            set.extend(self.proper_ancestors(node, None));
        }
        set
    }

    pub(crate) fn state_value(&self, active: &BTreeSet<NodeId>) -> StateValue {
        self.value_of(NodeId::ROOT, active)
    }

    fn value_of(&self, node: NodeId, active: &BTreeSet<NodeId>) -> StateValue {
        let state = &self.nodes[node.0];
        let children: Vec<NodeId> = state
            .children
            .iter()
            .copied()
            .filter(|child| active.contains(child))
            .collect();
        if state.kind == NodeKind::Compound {
            if let Some(child) = children.first() {
                if self.nodes[child.0].is_atomic() {
                    return StateValue::Leaf(self.nodes[child.0].key.clone());
                }
            }
        }
        StateValue::Branch(
            children
                .into_iter()
                .map(|child| (self.nodes[child.0].key.clone(), self.value_of(child, active)))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    /// The active node set a state value describes. Returns the first
    /// unknown key on failure.
    pub(crate) fn nodes_from_value(&self, value: &StateValue) -> Result<BTreeSet<NodeId>, String> {
        let mut set = BTreeSet::new();
        self.collect_value(NodeId::ROOT, value, &mut set)?;
        Ok(self.complete(set))
    }

    fn collect_value(
        &self,
        node: NodeId,
        value: &StateValue,
        set: &mut BTreeSet<NodeId>,
    ) -> Result<(), String> {
        set.insert(node);
        match value {
            StateValue::Leaf(key) => {
                let child = self.child_by_key(node, key).ok_or_else(|| key.clone())?;
                set.insert(child);
            }
            StateValue::Branch(map) => {
                for (key, sub) in map {
                    let child = self.child_by_key(node, key).ok_or_else(|| key.clone())?;
                    self.collect_value(child, sub, set)?;
                }
            }
        }
        Ok(())
    }

    /// Transitions of `node` that may handle `event_type`, in priority
    /// order: the exact descriptor, else matching wildcards, longest
    /// first. Only descriptors the node declares are memoised.
    pub(crate) fn candidates(&self, node: NodeId, event_type: &str) -> Candidates {
        let on = &self.nodes[node.0].on;
        if let Some((descriptor, exact)) = on.iter().find(|(descriptor, _)| descriptor == event_type) {
            let key = (node, descriptor.clone());
            let cached = self.candidates.borrow().get(&key).cloned();
            if let Some(hit) = cached {
                return hit;
            }
            let list = Rc::new(exact.clone());
            self.candidates.borrow_mut().insert(key, list.clone());
            return list;
        }

        let mut matching: Vec<&(String, Vec<Rc<TransitionDefinition>>)> = on
            .iter()
            .filter(|(descriptor, _)| {
                (descriptor == WILDCARD || descriptor.ends_with(".*")) && descriptor_matches(descriptor, event_type)
            })
            .collect();
        matching.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Rc::new(
            matching
                .into_iter()
                .flat_map(|(_, list)| list.iter().cloned())
                .collect(),
        )
    }
}

fn push_candidate(
    on: &mut Vec<(String, Vec<Rc<TransitionDefinition>>)>,
    descriptor: &str,
    transition: TransitionDefinition,
) {
    let transition = Rc::new(transition);
    match on.iter_mut().find(|(existing, _)| existing == descriptor) {
        Some((_, list)) => list.push(transition),
        None => on.push((descriptor.to_string(), vec![transition])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TransitionConfig;
    use crate::machine::HistoryKind;

    fn light() -> StateConfig {
        StateConfig::new()
            .initial("green")
            .state("green", StateConfig::new().on("TIMER", "yellow"))
            .state("yellow", StateConfig::new().on("TIMER", "red"))
            .state(
                "red",
                StateConfig::new()
                    .initial("walk")
                    .state("walk", StateConfig::new().on("COUNTDOWN", "wait"))
                    .state("wait", StateConfig::new().on("COUNTDOWN", "stop"))
                    .state("stop", StateConfig::new())
                    .on("TIMER", "green"),
            )
    }

    #[test]
    fn nodes_are_numbered_in_document_order() {
        let tree = StateTree::compile("light", &light()).unwrap();
        let ids: Vec<&str> = tree.nodes().map(StateNode::id).collect();
        assert_eq!(
            ids,
            vec![
                "light",
                "light.green",
                "light.yellow",
                "light.red",
                "light.red.walk",
                "light.red.wait",
                "light.red.stop"
            ]
        );
    }

    #[test]
    fn targets_resolve_by_sibling_child_and_id() {
        let tree = StateTree::compile("light", &light()).unwrap();
        let green = tree.get_by_id("light.green").unwrap();
        let red = tree.get_by_id("light.red").unwrap();
        let walk = tree.get_by_id("light.red.walk").unwrap();

        assert_eq!(tree.resolve_target(green, "red"), Some(red));
        assert_eq!(tree.resolve_target(green, "red.walk"), Some(walk));
        assert_eq!(tree.resolve_target(red, ".walk"), Some(walk));
        assert_eq!(tree.resolve_target(green, "#light.red.walk"), Some(walk));
        assert_eq!(tree.resolve_target(green, "missing"), None);
    }

    #[test]
    fn custom_ids_are_addressable() {
        let config = StateConfig::new()
            .state("a", StateConfig::new().id("first").state("x", StateConfig::new()))
            .state("b", StateConfig::new().on("GO", "#first.x"));
        let tree = StateTree::compile("m", &config).unwrap();
        let x = tree.get_by_id("m.a.x").unwrap();
        let b = tree.get_by_id("m.b").unwrap();
        assert_eq!(tree.resolve_target(b, "#first.x"), Some(x));
    }

    #[test]
    fn all_problems_are_reported_together() {
        let config = StateConfig::new()
            .initial("nowhere")
            .state("a", StateConfig::new().on("GO", "missing").on("a.*.b", "a"))
            .state("b", StateConfig::new().final_state().state("c", StateConfig::new()));
        let err = StateTree::compile("m", &config).unwrap_err();
        let issues = err.issues();
        assert_eq!(issues.len(), 4);
        assert!(issues.contains(&ConfigIssue::UnknownInitial {
            state: "m".into(),
            initial: "nowhere".into()
        }));
        assert!(issues.contains(&ConfigIssue::UnknownTarget {
            state: "m.a".into(),
            event: "GO".into(),
            target: "missing".into()
        }));
        assert!(issues.contains(&ConfigIssue::InfixWildcard {
            state: "m.a".into(),
            descriptor: "a.*.b".into()
        }));
        assert!(issues.contains(&ConfigIssue::FinalWithChildren { state: "m.b".into() }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config = StateConfig::new()
            .state("a", StateConfig::new().id("same"))
            .state("b", StateConfig::new().id("same"));
        let err = StateTree::compile("m", &config).unwrap_err();
        assert_eq!(err.issues(), &[ConfigIssue::DuplicateId { id: "same".into() }]);
    }

    #[test]
    fn compound_without_initial_enters_first_child() {
        let config = StateConfig::new()
            .state("h", StateConfig::new().history(HistoryKind::Shallow))
            .state("first", StateConfig::new())
            .state("second", StateConfig::new());
        let tree = StateTree::compile("m", &config).unwrap();
        let initial = tree.initial_state_nodes(NodeId::ROOT);
        let first = tree.get_by_id("m.first").unwrap();
        assert_eq!(initial, BTreeSet::from([NodeId::ROOT, first]));
    }

    #[test]
    fn candidates_prefer_exact_then_longest_wildcard() {
        let config = StateConfig::new().state(
            "a",
            StateConfig::new()
                .on("*", TransitionConfig::targetless().description("any"))
                .on("mouse.*", TransitionConfig::targetless().description("mouse"))
                .on("mouse.click.*", TransitionConfig::targetless().description("click"))
                .on("mouse.click", TransitionConfig::targetless().description("exact")),
        );
        let tree = StateTree::compile("m", &config).unwrap();
        let a = tree.get_by_id("m.a").unwrap();

        let describe = |event: &str| -> Vec<String> {
            tree.candidates(a, event)
                .iter()
                .map(|t| t.description().unwrap_or_default().to_string())
                .collect()
        };

        assert_eq!(describe("mouse.click"), vec!["exact"]);
        assert_eq!(describe("mouse.click.left"), vec!["click", "mouse", "any"]);
        assert_eq!(describe("key.down"), vec!["any"]);
    }

    #[test]
    fn state_value_round_trips_through_node_sets() {
        let tree = StateTree::compile("light", &light()).unwrap();
        let value = StateValue::from_path("red.wait");
        let nodes = tree.nodes_from_value(&value).unwrap();
        assert_eq!(tree.state_value(&nodes), value);

        let partial = tree.nodes_from_value(&StateValue::from_path("red")).unwrap();
        assert_eq!(tree.state_value(&partial), StateValue::from_path("red.walk"));

        assert_eq!(
            tree.nodes_from_value(&StateValue::from_path("blue")),
            Err("blue".to_string())
        );
    }

    #[test]
    fn parallel_nodes_complete_every_region() {
        let config = StateConfig::new()
            .parallel()
            .state(
                "bold",
                StateConfig::new()
                    .state("off", StateConfig::new())
                    .state("on", StateConfig::new()),
            )
            .state(
                "italic",
                StateConfig::new()
                    .state("off", StateConfig::new())
                    .state("on", StateConfig::new()),
            );
        let tree = StateTree::compile("text", &config).unwrap();
        let nodes = tree.complete(BTreeSet::from([tree.get_by_id("text.bold.on").unwrap()]));
        let value = tree.state_value(&nodes);
        assert!(value.matches(&StateValue::from_path("bold.on")));
        assert!(value.matches(&StateValue::from_path("italic.off")));
    }

    #[test]
    fn inline_invoke_logic_gets_a_generated_name() {
        use crate::actor::from_transition;
        use crate::builder::InvokeConfig;
        use crate::core::Value;

        let logic = from_transition(|state, _, _| Ok(state.clone()), Value::object());
        let config = StateConfig::new().state("a", StateConfig::new().invoke(InvokeConfig::new(logic)));
        let tree = StateTree::compile("m", &config).unwrap();
        let a = tree.node(tree.get_by_id("m.a").unwrap());
        assert_eq!(a.invoke_ids, vec!["m.a[0]".to_string()]);
        assert_eq!(a.invoke[0].src, "xstate.invoke.0.m.a");
        assert!(tree.invoke_logic("xstate.invoke.0.m.a").is_some());
    }

    #[test]
    fn completion_skips_history_initials() {
        let config = StateConfig::new().state(
            "player",
            StateConfig::new()
                .initial("hist")
                .state("playing", StateConfig::new())
                .state("paused", StateConfig::new())
                .state("hist", StateConfig::new().history(HistoryKind::Shallow).history_target("paused")),
        );
        let tree = StateTree::compile("m", &config).unwrap();
        let player = tree.get_by_id("m.player").unwrap();
        let hist = tree.get_by_id("m.player.hist").unwrap();

        let nodes = tree.complete(BTreeSet::from([player]));
        assert!(!nodes.contains(&hist));
        assert!(nodes.contains(&tree.get_by_id("m.player.paused").unwrap()));
        assert_eq!(tree.state_value(&nodes), StateValue::from_path("player.paused"));
    }

    #[test]
    fn only_declared_descriptors_are_memoised() {
        let tree = StateTree::compile("light", &light()).unwrap();
        let green = tree.get_by_id("light.green").unwrap();

        assert_eq!(tree.candidates(green, "TIMER").len(), 1);
        for n in 0..50 {
            assert!(tree.candidates(green, &format!("NOISE.{n}")).is_empty());
        }

        assert_eq!(tree.candidates.borrow().len(), 1);
    }
}
