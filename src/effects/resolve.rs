//! Resolution of actions against a snapshot.
//!
//! Each action maps `(snapshot, event, params)` to a new snapshot and, for
//! `enqueue_actions` and named references, further actions that are
//! resolved against the already updated snapshot. Side effects are handed
//! to the actor scope, never run inline.

use crate::actor::{ActorError, ActorRef, ActorScope, ParentHandle, ProcessingStatus, SpawnOptions};
use crate::core::{Event, GuardScope, Value};
use crate::effects::action::{Action, ActionArgs, AssignArgs, AssignFn, Delay, Enqueue, SpawnAction, Target};
use crate::machine::{MachineSnapshot, StateMachine};
use std::collections::VecDeque;
use std::rc::Rc;

/// Per-microstep resolution state.
pub(crate) struct Pass<'q> {
    pub(crate) queue: &'q mut VecDeque<Event>,
    /// Ids of children spawned by the state being entered; sends to them
    /// are resolved when the send executes.
    pub(crate) deferred_ids: &'q [String],
}

enum Recipient {
    Actor(ActorRef),
    Parent(ParentHandle),
    Pending(String),
}

pub(crate) struct Resolver<'a> {
    pub(crate) machine: &'a StateMachine,
    pub(crate) scope: &'a ActorScope,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(machine: &'a StateMachine, scope: &'a ActorScope) -> Self {
        Self { machine, scope }
    }

    pub(crate) fn resolve(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        actions: &[Action],
        pass: &mut Pass<'_>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let mut current = snapshot;
        for action in actions {
            current = self.resolve_one(current, event, action, &Value::Null, pass)?;
        }
        Ok(current)
    }

    fn resolve_one(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        action: &Action,
        params: &Value,
        pass: &mut Pass<'_>,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let self_ref = self.scope.self_ref();
        match action {
            Action::Named { name, params } => {
                match self.machine.implementations().action(name) {
                    Some(implementation) => {
                        let implementation = implementation.clone();
                        self.resolve_one(snapshot, event, &implementation, params, pass)
                    }
                    None => {
                        tracing::warn!(action = %name, machine = %self.machine.id(), "action is not implemented");
                        Ok(snapshot)
                    }
                }
            }
            Action::Custom { name, exec } => {
                let exec = exec.clone();
                let name = name.clone();
                let context = snapshot.context().clone();
                let event = event.clone();
                let params = params.clone();
                let actor = self_ref.clone();
                self.scope.execute(move || {
                    tracing::trace!(action = %name, actor = %actor.id(), "executing action");
                    exec(&ActionArgs {
                        context: &context,
                        event: &event,
                        params: &params,
                        self_ref: &actor,
                    })
                })?;
                Ok(snapshot)
            }
            Action::Assign(assign) => self.resolve_assign(snapshot, event, assign, params),
            Action::Raise { event: expr, delay, id } => {
                let args = action_args(&snapshot, event, params, self_ref);
                let raised = expr.eval(&args)?;
                match delay {
                    None => pass.queue.push_back(raised),
                    Some(delay) => {
                        let ms = self.resolve_delay(delay, &args)?;
                        let actor = self_ref.clone();
                        let id = id.clone();
                        self.scope.defer(move || {
                            actor.system().scheduler().schedule(&actor, &actor, raised, ms, id);
                            Ok(())
                        });
                    }
                }
                Ok(snapshot)
            }
            Action::SendTo {
                target,
                event: expr,
                delay,
                id,
            } => {
                let args = action_args(&snapshot, event, params, self_ref);
                let recipient = self.resolve_recipient(target, &snapshot, &args, pass)?;
                let sent = expr.eval(&args)?;
                let ms = delay
                    .as_ref()
                    .map(|delay| self.resolve_delay(delay, &args))
                    .transpose()?;
                let actor = self_ref.clone();
                let id = id.clone();
                self.scope
                    .defer(move || deliver(&actor, recipient, sent, ms, id));
                Ok(snapshot)
            }
            Action::SpawnChild(spawn) => self.resolve_spawn(snapshot, event, spawn, params),
            Action::StopChild(target) => self.resolve_stop(snapshot, event, target, params),
            Action::Cancel(expr) => {
                let id = expr.eval(&action_args(&snapshot, event, params, self_ref))?;
                let actor = self_ref.clone();
                self.scope.defer(move || {
                    actor.system().scheduler().cancel(&actor, &id);
                    Ok(())
                });
                Ok(snapshot)
            }
            Action::Emit(expr) => {
                let emitted = expr.eval(&action_args(&snapshot, event, params, self_ref))?;
                let scope = self.scope.clone();
                self.scope.defer(move || {
                    scope.emit(&emitted);
                    Ok(())
                });
                Ok(snapshot)
            }
            Action::Log { label, value } => {
                let value = match value {
                    Some(expr) => expr.eval(&action_args(&snapshot, event, params, self_ref))?,
                    None => Value::object()
                        .with("context", snapshot.context().clone())
                        .with("event", event.event_type()),
                };
                let label = label.clone();
                let scope = self.scope.clone();
                self.scope.defer(move || {
                    scope.log(label.as_deref(), &value);
                    Ok(())
                });
                Ok(snapshot)
            }
            Action::EnqueueActions(collect) => {
                let actions = {
                    let guards: &dyn GuardScope = &*snapshot;
                    let mut enqueue = Enqueue {
                        context: snapshot.context(),
                        event,
                        params,
                        guards,
                        actions: Vec::new(),
                    };
                    collect(&mut enqueue)?;
                    enqueue.actions
                };
                self.resolve(snapshot, event, &actions, pass)
            }
        }
    }

    fn resolve_assign(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        assign: &AssignFn,
        params: &Value,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        if !snapshot.context().is_object() {
            return Err(ActorError::InvalidContext(
                "cannot assign to a non-object context".to_string(),
            ));
        }
        let (partial, spawned) = {
            let mut args = AssignArgs {
                context: snapshot.context(),
                event,
                params,
                scope: self.scope,
                machine: self.machine,
                spawned: Vec::new(),
            };
            let partial = assign(&mut args)?;
            (partial, args.spawned)
        };
        let context = snapshot.context().merged(partial).ok_or_else(|| {
            ActorError::InvalidContext("assign must return an object".to_string())
        })?;
        Ok(snapshot.derive(|next| {
            next.context = context;
            for child in spawned {
                next.children.insert(child.id().to_string(), child);
            }
        }))
    }

    fn resolve_spawn(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        spawn: &SpawnAction,
        params: &Value,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let (logic, src) = self.machine.resolve_source(&spawn.src)?;
        let input = match &spawn.input {
            Some(expr) => expr.eval(&action_args(&snapshot, event, params, self.scope.self_ref()))?,
            None => Value::Null,
        };
        let options = SpawnOptions {
            id: spawn.id.clone(),
            system_id: spawn.system_id.clone(),
            input,
            sync_snapshot: spawn.sync_snapshot,
            src,
            snapshot: None,
        };
        let child = self.scope.spawn(logic, options)?;
        let started = child.clone();
        self.scope.defer(move || {
            started.start_internal();
            Ok(())
        });
        Ok(snapshot.derive(|next| {
            next.children.insert(child.id().to_string(), child);
        }))
    }

    fn resolve_stop(
        &self,
        snapshot: Rc<MachineSnapshot>,
        event: &Event,
        target: &Target,
        params: &Value,
    ) -> Result<Rc<MachineSnapshot>, ActorError> {
        let args = action_args(&snapshot, event, params, self.scope.self_ref());
        let child = match target {
            Target::Child(expr) => {
                let id = expr.eval(&args)?;
                let key = id.strip_prefix("#_").unwrap_or(&id);
                snapshot.children().get(key).cloned()
            }
            Target::Actor(expr) => Some(expr.eval(&args)?),
            Target::System(system_id) => self.scope.system().get(system_id),
            Target::Parent | Target::Internal => {
                return Err(ActorError::custom("stopChild can only target a child actor"));
            }
        };
        let Some(child) = child else {
            return Ok(snapshot);
        };

        let next = if snapshot.children().contains_key(child.id()) {
            snapshot.derive(|next| {
                next.children.remove(child.id());
            })
        } else {
            snapshot
        };

        let scope = self.scope.clone();
        self.scope.execute(move || {
            scope.system().unregister(&child);
            if child.status() != ProcessingStatus::Running {
                return scope.stop_child(&child);
            }
            let inner = scope.clone();
            scope.defer(move || inner.stop_child(&child));
            Ok(())
        })?;
        Ok(next)
    }

    fn resolve_recipient(
        &self,
        target: &Target,
        snapshot: &MachineSnapshot,
        args: &ActionArgs<'_>,
        pass: &Pass<'_>,
    ) -> Result<Recipient, ActorError> {
        let unknown = |target: String| ActorError::UnknownTarget {
            target,
            source_id: self.scope.id().to_string(),
        };
        match target {
            Target::Parent => self
                .scope
                .parent()
                .cloned()
                .map(Recipient::Parent)
                .ok_or_else(|| unknown("parent".to_string())),
            Target::Internal => Ok(Recipient::Actor(self.scope.self_ref().clone())),
            Target::Actor(expr) => Ok(Recipient::Actor(expr.eval(args)?)),
            Target::System(system_id) => self
                .scope
                .system()
                .get(system_id)
                .map(Recipient::Actor)
                .ok_or_else(|| unknown(system_id.clone())),
            Target::Child(expr) => {
                let id = expr.eval(args)?;
                if let Some(key) = id.strip_prefix("#_") {
                    return snapshot
                        .children()
                        .get(key)
                        .cloned()
                        .map(Recipient::Actor)
                        .ok_or_else(|| unknown(id.clone()));
                }
                if pass.deferred_ids.iter().any(|deferred| *deferred == id) {
                    return Ok(Recipient::Pending(id));
                }
                snapshot
                    .children()
                    .get(&id)
                    .cloned()
                    .map(Recipient::Actor)
                    .ok_or_else(|| unknown(id))
            }
        }
    }

    fn resolve_delay(&self, delay: &Delay, args: &ActionArgs<'_>) -> Result<u64, ActorError> {
        match delay {
            Delay::Millis(ms) => Ok(*ms),
            Delay::Expr(f) => f(args),
            Delay::Named(name) => match self.machine.implementations().delay(name) {
                Some(Delay::Named(_)) | None => name.parse().map_err(|_| ActorError::NotImplemented {
                    kind: "delay",
                    name: name.clone(),
                }),
                Some(resolved) => self.resolve_delay(resolved, args),
            },
        }
    }
}

fn action_args<'s>(
    snapshot: &'s MachineSnapshot,
    event: &'s Event,
    params: &'s Value,
    self_ref: &'s ActorRef,
) -> ActionArgs<'s> {
    ActionArgs {
        context: snapshot.context(),
        event,
        params,
        self_ref,
    }
}

fn deliver(
    actor: &ActorRef,
    recipient: Recipient,
    event: Event,
    delay: Option<u64>,
    id: Option<String>,
) -> Result<(), ActorError> {
    let target = match recipient {
        Recipient::Actor(target) => target,
        Recipient::Parent(parent) => match parent.actor() {
            Some(target) => target,
            None => return Ok(()),
        },
        Recipient::Pending(child_id) => actor
            .machine_snapshot()
            .and_then(|snapshot| snapshot.children().get(&child_id).cloned())
            .ok_or_else(|| ActorError::UnknownTarget {
                target: child_id,
                source_id: actor.id().to_string(),
            })?,
    };
    let system = actor.system();
    match delay {
        Some(ms) => system.scheduler().schedule(actor, &target, event, ms, id),
        None => system.relay(Some(actor), &target, event),
    }
    Ok(())
}
