//! Non-machine logic: a minimal snapshot and the reducer-style adapter.

use crate::actor::{ActorError, ActorLogic, ActorScope, AnySnapshot, Logic, LogicSnapshot, SnapshotStatus};
use crate::checkpoint::{persist_value, PersistError};
use crate::core::{Event, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::rc::Rc;

/// Status, output and error, nothing else. Used as the placeholder before
/// an actor's logic has produced a snapshot and for failed initialisation.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicSnapshot {
    pub status: SnapshotStatus,
    pub output: Option<Value>,
    pub error: Option<ActorError>,
}

impl BasicSnapshot {
    pub(crate) fn placeholder() -> AnySnapshot {
        Rc::new(BasicSnapshot {
            status: SnapshotStatus::Active,
            output: None,
            error: None,
        })
    }

    pub(crate) fn errored(error: ActorError) -> AnySnapshot {
        Rc::new(BasicSnapshot {
            status: SnapshotStatus::Error,
            output: None,
            error: Some(error),
        })
    }
}

impl LogicSnapshot for BasicSnapshot {
    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    fn with_error(&self, error: ActorError) -> AnySnapshot {
        BasicSnapshot::errored(error)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Snapshot of [`from_transition`] logic: the reducer state lives in
/// `context`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionSnapshot {
    pub context: Value,
    pub status: SnapshotStatus,
    pub error: Option<ActorError>,
}

impl LogicSnapshot for TransitionSnapshot {
    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn output(&self) -> Option<&Value> {
        None
    }

    fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    fn context(&self) -> Option<&Value> {
        Some(&self.context)
    }

    fn with_error(&self, error: ActorError) -> AnySnapshot {
        Rc::new(TransitionSnapshot {
            context: self.context.clone(),
            status: SnapshotStatus::Error,
            error: Some(error),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedTransitionSnapshot {
    status: SnapshotStatus,
    context: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type Reducer = dyn Fn(&Value, &Event, &ActorScope) -> Result<Value, ActorError>;
type Initializer = dyn Fn(&Value) -> Value;

struct TransitionLogic {
    reducer: Box<Reducer>,
    initial: Box<Initializer>,
}

impl ActorLogic for TransitionLogic {
    fn initial_snapshot(&self, _scope: &ActorScope, input: &Value) -> Result<AnySnapshot, ActorError> {
        Ok(Rc::new(TransitionSnapshot {
            context: (self.initial)(input),
            status: SnapshotStatus::Active,
            error: None,
        }))
    }

    fn transition(
        &self,
        snapshot: &AnySnapshot,
        event: &Event,
        scope: &ActorScope,
    ) -> Result<AnySnapshot, ActorError> {
        let context = snapshot.context().cloned().unwrap_or_default();
        let next = (self.reducer)(&context, event, scope)?;
        Ok(Rc::new(TransitionSnapshot {
            context: next,
            status: snapshot.status(),
            error: None,
        }))
    }

    fn persisted_snapshot(&self, snapshot: &AnySnapshot) -> Result<serde_json::Value, PersistError> {
        let persisted = PersistedTransitionSnapshot {
            status: snapshot.status(),
            context: persist_value(snapshot.context().unwrap_or(&Value::Null)),
            error: snapshot.error().map(ToString::to_string),
        };
        serde_json::to_value(persisted).map_err(|e| PersistError::Serialization(e.to_string()))
    }

    fn restore_snapshot(
        &self,
        persisted: &serde_json::Value,
        _scope: &ActorScope,
    ) -> Result<AnySnapshot, ActorError> {
        let persisted: PersistedTransitionSnapshot = serde_json::from_value(persisted.clone())
            .map_err(|e| PersistError::Deserialization(e.to_string()))?;
        Ok(Rc::new(TransitionSnapshot {
            context: Value::from(persisted.context),
            status: persisted.status,
            error: persisted.error.map(ActorError::Custom),
        }))
    }
}

/// Actor logic from a reducer: `(state, event, scope) -> state`.
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{create_actor, from_transition, ActorOptions};
/// use statecraft::core::Value;
///
/// let counter = from_transition(
///     |state, event, _scope| {
///         let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
///         Ok(match event.event_type() {
///             "INC" => state.clone().with("count", count + 1),
///             _ => state.clone(),
///         })
///     },
///     Value::object().with("count", 0),
/// );
///
/// let actor = create_actor(counter, ActorOptions::default());
/// actor.start();
/// actor.send("INC");
/// let count = actor.snapshot().context().and_then(|c| c.get("count")).and_then(Value::as_i64);
/// assert_eq!(count, Some(1));
/// ```
pub fn from_transition<F>(reducer: F, initial: Value) -> Logic
where
    F: Fn(&Value, &Event, &ActorScope) -> Result<Value, ActorError> + 'static,
{
    from_transition_with_input(reducer, move |_| initial.clone())
}

/// Like [`from_transition`], computing the initial state from the actor's
/// input.
pub fn from_transition_with_input<F, I>(reducer: F, initial: I) -> Logic
where
    F: Fn(&Value, &Event, &ActorScope) -> Result<Value, ActorError> + 'static,
    I: Fn(&Value) -> Value + 'static,
{
    Rc::new(TransitionLogic {
        reducer: Box::new(reducer),
        initial: Box::new(initial),
    })
}
