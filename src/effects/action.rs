//! Action definitions.

use crate::actor::{ActorError, ActorRef, ActorScope, Logic, SpawnOptions};
use crate::core::{Event, Guard, GuardArgs, GuardScope, Value};
use crate::machine::StateMachine;
use std::fmt;
use std::rc::Rc;

/// What a user-supplied closure sees when an action runs.
pub struct ActionArgs<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    pub params: &'a Value,
    pub self_ref: &'a ActorRef,
}

pub type ActionFn = Rc<dyn Fn(&ActionArgs<'_>) -> Result<(), ActorError>>;
pub type AssignFn = Rc<dyn Fn(&mut AssignArgs<'_>) -> Result<Value, ActorError>>;
pub type EnqueueFn = Rc<dyn Fn(&mut Enqueue<'_>) -> Result<(), ActorError>>;
type ExprFn<T> = Rc<dyn Fn(&ActionArgs<'_>) -> Result<T, ActorError>>;

/// A value that is either fixed or computed from the action arguments.
pub enum Expr<T> {
    Value(T),
    Fn(ExprFn<T>),
}

impl<T: Clone> Expr<T> {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<T, ActorError> + 'static,
    {
        Expr::Fn(Rc::new(f))
    }

    pub fn eval(&self, args: &ActionArgs<'_>) -> Result<T, ActorError> {
        match self {
            Expr::Value(value) => Ok(value.clone()),
            Expr::Fn(f) => f(args),
        }
    }
}

impl<T: Clone> Clone for Expr<T> {
    fn clone(&self) -> Self {
        match self {
            Expr::Value(value) => Expr::Value(value.clone()),
            Expr::Fn(f) => Expr::Fn(f.clone()),
        }
    }
}

impl<T> From<T> for Expr<T> {
    fn from(value: T) -> Self {
        Expr::Value(value)
    }
}

impl From<&str> for Expr<Event> {
    fn from(event_type: &str) -> Self {
        Expr::Value(Event::new(event_type))
    }
}

impl From<&str> for Expr<String> {
    fn from(value: &str) -> Self {
        Expr::Value(value.to_string())
    }
}

/// A delay in milliseconds: literal, named (resolved through the machine's
/// implementations) or computed.
#[derive(Clone)]
pub enum Delay {
    Millis(u64),
    Named(String),
    Expr(ExprFn<u64>),
}

impl Delay {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<u64, ActorError> + 'static,
    {
        Delay::Expr(Rc::new(f))
    }

    /// Token used in `xstate.after.<key>.<state id>`.
    pub(crate) fn key(&self, index: usize) -> String {
        match self {
            Delay::Millis(ms) => ms.to_string(),
            Delay::Named(name) => name.clone(),
            Delay::Expr(_) => format!("delay{index}"),
        }
    }
}

impl From<u64> for Delay {
    fn from(ms: u64) -> Self {
        Delay::Millis(ms)
    }
}

impl From<&str> for Delay {
    fn from(name: &str) -> Self {
        Delay::Named(name.to_string())
    }
}

impl From<String> for Delay {
    fn from(name: String) -> Self {
        Delay::Named(name)
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delay::Millis(ms) => write!(f, "Delay({ms}ms)"),
            Delay::Named(name) => write!(f, "Delay({name})"),
            Delay::Expr(_) => f.write_str("Delay(<fn>)"),
        }
    }
}

/// Who an event is sent to.
#[derive(Clone)]
pub enum Target {
    Parent,
    /// The actor itself, through its mailbox.
    Internal,
    /// A child by id. `"#_<id>"` is accepted as well.
    Child(Expr<String>),
    Actor(Expr<ActorRef>),
    /// An actor registered under a system id.
    System(String),
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Child(id.into())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Target::Child(Expr::Value(id))
    }
}

impl From<ActorRef> for Target {
    fn from(actor: ActorRef) -> Self {
        Target::Actor(Expr::Value(actor))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Parent => f.write_str("Parent"),
            Target::Internal => f.write_str("Internal"),
            Target::Child(Expr::Value(id)) => write!(f, "Child({id})"),
            Target::Child(Expr::Fn(_)) => f.write_str("Child(<fn>)"),
            Target::Actor(Expr::Value(actor)) => write!(f, "Actor({})", actor.id()),
            Target::Actor(Expr::Fn(_)) => f.write_str("Actor(<fn>)"),
            Target::System(id) => write!(f, "System({id})"),
        }
    }
}

/// Where child logic comes from.
#[derive(Clone)]
pub enum LogicSource {
    /// Looked up in the machine's actor implementations. Persistable.
    Named(String),
    Inline(Logic),
}

impl From<&str> for LogicSource {
    fn from(name: &str) -> Self {
        LogicSource::Named(name.to_string())
    }
}

impl From<String> for LogicSource {
    fn from(name: String) -> Self {
        LogicSource::Named(name)
    }
}

impl From<Logic> for LogicSource {
    fn from(logic: Logic) -> Self {
        LogicSource::Inline(logic)
    }
}

impl fmt::Debug for LogicSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicSource::Named(name) => write!(f, "Named({name})"),
            LogicSource::Inline(_) => f.write_str("Inline"),
        }
    }
}

/// Parameters of a `spawnChild` action.
#[derive(Clone, Debug)]
pub struct SpawnAction {
    pub src: LogicSource,
    pub id: Option<String>,
    pub system_id: Option<String>,
    pub input: Option<Expr<Value>>,
    pub sync_snapshot: bool,
}

impl fmt::Debug for Expr<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(value) => write!(f, "{value:?}"),
            Expr::Fn(_) => f.write_str("<fn>"),
        }
    }
}

impl SpawnAction {
    pub fn new(src: impl Into<LogicSource>) -> Self {
        Self {
            src: src.into(),
            id: None,
            system_id: None,
            input: None,
            sync_snapshot: false,
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

    pub fn sync_snapshot(mut self, sync: bool) -> Self {
        self.sync_snapshot = sync;
        self
    }
}

/// The closed family of actions a machine can run.
///
/// Built-ins are resolved against the current snapshot and queue their side
/// effects until the snapshot is committed. `Custom` closures are executed
/// right away when the actor is running and deferred otherwise.
#[derive(Clone)]
pub enum Action {
    Assign(AssignFn),
    Raise {
        event: Expr<Event>,
        delay: Option<Delay>,
        id: Option<String>,
    },
    SendTo {
        target: Target,
        event: Expr<Event>,
        delay: Option<Delay>,
        id: Option<String>,
    },
    SpawnChild(SpawnAction),
    StopChild(Target),
    Cancel(Expr<String>),
    Emit(Expr<Event>),
    Log {
        label: Option<String>,
        value: Option<Expr<Value>>,
    },
    EnqueueActions(EnqueueFn),
    /// Reference to an entry in the machine's action implementations.
    Named {
        name: String,
        params: Value,
    },
    Custom {
        name: String,
        exec: ActionFn,
    },
}

impl Action {
    /// Merge the returned object into context.
    pub fn assign<F>(f: F) -> Self
    where
        F: Fn(&mut AssignArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        Action::Assign(Rc::new(f))
    }

    /// Put an event on the internal queue, processed within the current
    /// macrostep.
    pub fn raise(event: impl Into<Event>) -> Self {
        Action::Raise {
            event: Expr::Value(event.into()),
            delay: None,
            id: None,
        }
    }

    pub fn raise_with<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Event, ActorError> + 'static,
    {
        Action::Raise {
            event: Expr::from_fn(f),
            delay: None,
            id: None,
        }
    }

    pub fn send_to(target: impl Into<Target>, event: impl Into<Event>) -> Self {
        Action::SendTo {
            target: target.into(),
            event: Expr::Value(event.into()),
            delay: None,
            id: None,
        }
    }

    pub fn send_to_with<F>(target: impl Into<Target>, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Event, ActorError> + 'static,
    {
        Action::SendTo {
            target: target.into(),
            event: Expr::from_fn(f),
            delay: None,
            id: None,
        }
    }

    pub fn send_parent(event: impl Into<Event>) -> Self {
        Action::send_to(Target::Parent, event)
    }

    pub fn send_parent_with<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Event, ActorError> + 'static,
    {
        Action::send_to_with(Target::Parent, f)
    }

    pub fn spawn_child(spawn: SpawnAction) -> Self {
        Action::SpawnChild(spawn)
    }

    pub fn stop_child(target: impl Into<Target>) -> Self {
        Action::StopChild(target.into())
    }

    /// Cancel a delayed `raise`/`send_to` by id.
    pub fn cancel(id: impl Into<String>) -> Self {
        Action::Cancel(Expr::Value(id.into()))
    }

    pub fn emit(event: impl Into<Event>) -> Self {
        Action::Emit(Expr::Value(event.into()))
    }

    pub fn emit_with<F>(f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Event, ActorError> + 'static,
    {
        Action::Emit(Expr::from_fn(f))
    }

    /// Log context and event type under `label`.
    pub fn log(label: impl Into<String>) -> Self {
        Action::Log {
            label: Some(label.into()),
            value: None,
        }
    }

    pub fn log_with<F>(label: Option<&str>, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<Value, ActorError> + 'static,
    {
        Action::Log {
            label: label.map(str::to_string),
            value: Some(Expr::from_fn(f)),
        }
    }

    pub fn enqueue_actions<F>(f: F) -> Self
    where
        F: Fn(&mut Enqueue<'_>) -> Result<(), ActorError> + 'static,
    {
        Action::EnqueueActions(Rc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Action::Named {
            name: name.into(),
            params: Value::Null,
        }
    }

    pub fn named_with(name: impl Into<String>, params: impl Into<Value>) -> Self {
        Action::Named {
            name: name.into(),
            params: params.into(),
        }
    }

    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionArgs<'_>) -> Result<(), ActorError> + 'static,
    {
        Action::Custom {
            name: name.into(),
            exec: Rc::new(f),
        }
    }

    /// Deliver after `delay`. Only meaningful for `raise` and `send_to`;
    /// other actions are returned unchanged.
    pub fn with_delay(mut self, delay: impl Into<Delay>) -> Self {
        if let Action::Raise { delay: slot, .. } | Action::SendTo { delay: slot, .. } = &mut self {
            *slot = Some(delay.into());
        }
        self
    }

    /// Id for cancelling a delayed `raise` or `send_to`.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        if let Action::Raise { id: slot, .. } | Action::SendTo { id: slot, .. } = &mut self {
            *slot = Some(id.into());
        }
        self
    }

    /// Short name for logs and errors.
    pub fn kind(&self) -> &str {
        match self {
            Action::Assign(_) => "xstate.assign",
            Action::Raise { .. } => "xstate.raise",
            Action::SendTo { .. } => "xstate.sendTo",
            Action::SpawnChild(_) => "xstate.spawnChild",
            Action::StopChild(_) => "xstate.stopChild",
            Action::Cancel(_) => "xstate.cancel",
            Action::Emit(_) => "xstate.emit",
            Action::Log { .. } => "xstate.log",
            Action::EnqueueActions(_) => "xstate.enqueueActions",
            Action::Named { name, .. } | Action::Custom { name, .. } => name,
        }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Action::named(name)
    }
}

impl From<SpawnAction> for Action {
    fn from(spawn: SpawnAction) -> Self {
        Action::SpawnChild(spawn)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Named { name, params } if !params.is_null() => {
                write!(f, "Action({name}, {params:?})")
            }
            Action::SendTo { target, .. } => write!(f, "Action(xstate.sendTo -> {target:?})"),
            other => write!(f, "Action({})", other.kind()),
        }
    }
}

/// Arguments of an `assign` closure. [`AssignArgs::spawn`] creates children
/// that become part of the next snapshot.
pub struct AssignArgs<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    pub params: &'a Value,
    pub(crate) scope: &'a ActorScope,
    pub(crate) machine: &'a StateMachine,
    pub(crate) spawned: Vec<ActorRef>,
}

impl AssignArgs<'_> {
    pub fn self_ref(&self) -> &ActorRef {
        self.scope.self_ref()
    }

    /// Create a child actor. It starts once the snapshot is committed.
    pub fn spawn(
        &mut self,
        src: impl Into<LogicSource>,
        mut options: SpawnOptions,
    ) -> Result<ActorRef, ActorError> {
        let (logic, name) = self.machine.resolve_source(&src.into())?;
        options.src = name;
        let child = self.scope.spawn(logic, options)?;
        let started = child.clone();
        self.scope.defer(move || {
            started.start_internal();
            Ok(())
        });
        self.spawned.push(child.clone());
        Ok(child)
    }
}

/// Collector passed to `enqueue_actions` closures.
pub struct Enqueue<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    pub params: &'a Value,
    pub(crate) guards: &'a dyn GuardScope,
    pub(crate) actions: Vec<Action>,
}

impl Enqueue<'_> {
    pub fn push(&mut self, action: impl Into<Action>) {
        self.actions.push(action.into());
    }

    /// Evaluate a guard against the current context and event.
    pub fn check(&self, guard: &Guard) -> Result<bool, ActorError> {
        let args = GuardArgs {
            context: self.context,
            event: self.event,
            params: &Value::Null,
        };
        guard.check(&args, self.guards)
    }
}
