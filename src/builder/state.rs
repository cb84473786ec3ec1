//! Builders for state node and invocation configurations.

use crate::actor::ActorError;
use crate::builder::transition::TransitionConfig;
use crate::core::Value;
use crate::effects::{Action, ActionArgs, Delay, Expr, LogicSource};
use crate::machine::{HistoryKind, NodeKind};

/// A child actor started when a state is entered and stopped when it is
/// exited.
#[derive(Clone, Debug)]
pub struct InvokeConfig {
    pub(crate) id: Option<String>,
    pub(crate) src: LogicSource,
    pub(crate) system_id: Option<String>,
    pub(crate) input: Option<Expr<Value>>,
    pub(crate) on_done: Vec<TransitionConfig>,
    pub(crate) on_error: Vec<TransitionConfig>,
    pub(crate) on_snapshot: Vec<TransitionConfig>,
}

impl InvokeConfig {
    pub fn new(src: impl Into<LogicSource>) -> Self {
        Self {
            id: None,
            src: src.into(),
            system_id: None,
            input: None,
            on_done: Vec::new(),
            on_error: Vec::new(),
            on_snapshot: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn input(mut self, input: impl Into<Value>) -> Self {
        self.input = Some(Expr::Value(input.into()));
        self
    }

    pub fn input_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        self.input = Some(Expr::from_fn(f));
        self
    }

    /// Transition taken on `xstate.done.actor.<id>`.
    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    /// Transition taken on `xstate.error.actor.<id>`.
    pub fn on_error(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_error.push(transition.into());
        self
    }

    /// Transition taken on `xstate.snapshot.<id>`. Turns on snapshot
    /// syncing for the child.
    pub fn on_snapshot(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_snapshot.push(transition.into());
        self
    }
}

/// Configuration of one state node and its subtree.
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{StateConfig, TransitionConfig};
/// use statecraft::effects::Action;
///
/// let red = StateConfig::new()
///     .entry(Action::log("stop"))
///     .on("TIMER", "green")
///     .on("EMERGENCY", TransitionConfig::to("#light.off").reenter(true));
/// ```
#[derive(Clone, Debug, Default)]
pub struct StateConfig {
    pub(crate) id: Option<String>,
    pub(crate) kind: Option<NodeKind>,
    pub(crate) history: HistoryKind,
    pub(crate) history_target: Option<String>,
    pub(crate) initial: Option<String>,
    pub(crate) initial_actions: Vec<Action>,
    pub(crate) states: Vec<(String, StateConfig)>,
    pub(crate) on: Vec<(String, TransitionConfig)>,
    pub(crate) always: Vec<TransitionConfig>,
    pub(crate) after: Vec<(Delay, TransitionConfig)>,
    pub(crate) on_done: Vec<TransitionConfig>,
    pub(crate) entry: Vec<Action>,
    pub(crate) exit: Vec<Action>,
    pub(crate) invoke: Vec<InvokeConfig>,
    pub(crate) tags: Vec<String>,
    pub(crate) output: Option<Expr<Value>>,
    pub(crate) meta: Option<Value>,
    pub(crate) description: Option<String>,
}

impl StateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default dot-path id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Child entered by default. Defaults to the first child.
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Actions run when the initial child is entered by default.
    pub fn initial_action(mut self, action: impl Into<Action>) -> Self {
        self.initial_actions.push(action.into());
        self
    }

    pub fn state(mut self, key: impl Into<String>, state: StateConfig) -> Self {
        self.states.push((key.into(), state));
        self
    }

    /// Add a candidate for `descriptor`. Candidates are tried in the order
    /// they were added.
    pub fn on(mut self, descriptor: impl Into<String>, transition: impl Into<TransitionConfig>) -> Self {
        self.on.push((descriptor.into(), transition.into()));
        self
    }

    /// Eventless transition, checked after every microstep.
    pub fn always(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.always.push(transition.into());
        self
    }

    /// Transition taken `delay` after the state is entered, unless it is
    /// exited first.
    pub fn after(mut self, delay: impl Into<Delay>, transition: impl Into<TransitionConfig>) -> Self {
        self.after.push((delay.into(), transition.into()));
        self
    }

    /// Transition taken when this compound or parallel state completes.
    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    pub fn entry(mut self, action: impl Into<Action>) -> Self {
        self.entry.push(action.into());
        self
    }

    pub fn exit(mut self, action: impl Into<Action>) -> Self {
        self.exit.push(action.into());
        self
    }

    pub fn invoke(mut self, invoke: InvokeConfig) -> Self {
        self.invoke.push(invoke);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn meta(mut self, meta: impl Into<Value>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Output of a final state, carried by the parent's done event.
    pub fn output(mut self, output: impl Into<Value>) -> Self {
        self.output = Some(Expr::Value(output.into()));
        self
    }

    pub fn output_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        self.output = Some(Expr::from_fn(f));
        self
    }

    /// All children are active at once.
    pub fn parallel(mut self) -> Self {
        self.kind = Some(NodeKind::Parallel);
        self
    }

    pub fn final_state(mut self) -> Self {
        self.kind = Some(NodeKind::Final);
        self
    }

    /// History pseudo-state of the given depth.
    pub fn history(mut self, kind: HistoryKind) -> Self {
        self.kind = Some(NodeKind::History);
        self.history = kind;
        self
    }

    /// Where a history state goes when nothing has been recorded yet,
    /// resolved from the history state's parent.
    pub fn history_target(mut self, target: impl Into<String>) -> Self {
        self.history_target = Some(target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_document_order() {
        let config = StateConfig::new()
            .state("b", StateConfig::new())
            .state("a", StateConfig::new());
        let keys: Vec<&str> = config.states.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn history_sets_kind() {
        let config = StateConfig::new().history(HistoryKind::Deep);
        assert_eq!(config.kind, Some(NodeKind::History));
        assert_eq!(config.history, HistoryKind::Deep);
    }

    #[test]
    fn invoke_collects_handlers() {
        let invoke = InvokeConfig::new("fetch")
            .id("fetcher")
            .on_done("success")
            .on_error("failure");
        assert_eq!(invoke.id.as_deref(), Some("fetcher"));
        assert_eq!(invoke.on_done.len(), 1);
        assert_eq!(invoke.on_error.len(), 1);
        assert!(invoke.on_snapshot.is_empty());
    }
}
