//! Builder for complete machine configurations.

use crate::actor::ActorError;
use crate::builder::error::BuildError;
use crate::builder::state::{InvokeConfig, StateConfig};
use crate::builder::transition::TransitionConfig;
use crate::core::Value;
use crate::effects::{Action, ActionArgs, AssignArgs, Expr};
use crate::machine::{ContextSource, Implementations, StateMachine, StateTree};
use std::rc::Rc;

/// Root of a machine configuration: the machine id, its initial context
/// and the root state node.
///
/// Methods that mirror [`StateConfig`] configure the root node.
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{MachineConfig, StateConfig, TransitionConfig};
/// use statecraft::core::Value;
/// use statecraft::effects::Action;
/// use statecraft::machine::Implementations;
///
/// let machine = MachineConfig::new("counter")
///     .context(Value::object().with("count", 0))
///     .initial("active")
///     .state(
///         "active",
///         StateConfig::new().on(
///             "INC",
///             TransitionConfig::targetless().action(Action::assign(|args| {
///                 let count = args.context.get("count").and_then(Value::as_i64).unwrap_or(0);
///                 Ok(Value::object().with("count", count + 1))
///             })),
///         ),
///     )
///     .build(Implementations::new())
///     .unwrap();
///
/// let initial = machine.initial_state().unwrap();
/// let next = machine.next_state(&initial, "INC").unwrap();
/// assert_eq!(next.context().get("count").and_then(Value::as_i64), Some(1));
/// ```
#[derive(Clone)]
pub struct MachineConfig {
    pub(crate) id: String,
    pub(crate) root: StateConfig,
    pub(crate) context: ContextSource,
}

impl MachineConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root: StateConfig::new(),
            context: ContextSource::default(),
        }
    }

    /// Replace the whole root node configuration.
    pub fn root(mut self, root: StateConfig) -> Self {
        self.root = root;
        self
    }

    pub fn context(mut self, context: impl Into<Value>) -> Self {
        self.context = ContextSource::Value(context.into());
        self
    }

    /// Compute the initial context from the init event (`args.event.input()`).
    /// Children spawned with [`AssignArgs::spawn`] are owned by the machine.
    pub fn context_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut AssignArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        self.context = ContextSource::Factory(Rc::new(factory));
        self
    }

    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.root = self.root.initial(key);
        self
    }

    pub fn state(mut self, key: impl Into<String>, state: StateConfig) -> Self {
        self.root = self.root.state(key, state);
        self
    }

    pub fn on(mut self, descriptor: impl Into<String>, transition: impl Into<TransitionConfig>) -> Self {
        self.root = self.root.on(descriptor, transition);
        self
    }

    pub fn always(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.root = self.root.always(transition);
        self
    }

    pub fn entry(mut self, action: impl Into<Action>) -> Self {
        self.root = self.root.entry(action);
        self
    }

    pub fn exit(mut self, action: impl Into<Action>) -> Self {
        self.root = self.root.exit(action);
        self
    }

    pub fn invoke(mut self, invoke: InvokeConfig) -> Self {
        self.root = self.root.invoke(invoke);
        self
    }

    /// Output of the machine once the root completes.
    pub fn output(mut self, output: impl Into<Value>) -> Self {
        self.root.output = Some(Expr::Value(output.into()));
        self
    }

    /// Output computed from the context and the root's done event.
    pub fn output_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        self.root.output = Some(Expr::from_fn(f));
        self
    }

    pub fn parallel(mut self) -> Self {
        self.root = self.root.parallel();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Compile the configuration. Every problem found is reported at once.
    pub fn build(self, implementations: Implementations) -> Result<StateMachine, BuildError> {
        let tree = StateTree::compile(&self.id, &self.root)?;
        tracing::debug!(machine = %self.id, states = tree.len(), "machine built");
        Ok(StateMachine::new(self.id, tree, implementations, self.context))
    }
}

impl std::fmt::Debug for MachineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineConfig")
            .field("id", &self.id)
            .field("root", &self.root)
            .finish()
    }
}
