//! Actors: logic, lifecycle and mailboxes.
//!
//! An actor runs one [`ActorLogic`] and owns its current snapshot. Events
//! arrive through a FIFO [`Mailbox`] and are processed one at a time; side
//! effects computed during a transition are queued and flushed only after
//! the resulting snapshot is committed.
//!
//! # Example
//!
//! ```rust
//! use statecraft::actor::{create_actor, ActorOptions};
//! use statecraft::builder::MachineConfig;
//! use statecraft::machine::Implementations;
//!
//! let machine = MachineConfig::new("toggle")
//!     .initial("off")
//!     .state("off", statecraft::builder::StateConfig::new().on("FLIP", "on"))
//!     .state("on", statecraft::builder::StateConfig::new().on("FLIP", "off"))
//!     .build(Implementations::new())
//!     .unwrap();
//!
//! let actor = create_actor(machine.logic(), ActorOptions::default());
//! actor.start();
//! actor.send("FLIP");
//! assert!(actor.machine_snapshot().unwrap().matches("on"));
//! ```

mod cell;
mod error;
mod logic;
mod mailbox;
mod observer;
mod scope;

pub use cell::{create_actor, ActorOptions, ActorRef, ParentHandle, ProcessingStatus, SpawnOptions};
pub(crate) use cell::WeakActorRef;
pub use error::{clear_unhandled_error_hook, set_unhandled_error_hook, ActorError};
pub(crate) use error::dispatch_unhandled_error;
pub use logic::{from_transition, from_transition_with_input, BasicSnapshot, TransitionSnapshot};
pub use mailbox::Mailbox;
pub use observer::{Observer, Subscription};
pub use scope::ActorScope;

use crate::checkpoint::PersistError;
use crate::core::{Event, Value};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Lifecycle status carried by every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Active,
    Done,
    Error,
    Stopped,
}

/// The snapshot side of the logic contract.
pub trait LogicSnapshot: fmt::Debug + 'static {
    fn status(&self) -> SnapshotStatus;

    fn output(&self) -> Option<&Value>;

    fn error(&self) -> Option<&ActorError>;

    fn context(&self) -> Option<&Value> {
        None
    }

    /// Copy of this snapshot with `status == Error`.
    fn with_error(&self, error: ActorError) -> AnySnapshot;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

pub type AnySnapshot = Rc<dyn LogicSnapshot>;

/// Downcast a type-erased snapshot.
pub fn downcast_snapshot<T: LogicSnapshot>(snapshot: &AnySnapshot) -> Option<Rc<T>> {
    snapshot.clone().into_any().downcast::<T>().ok()
}

/// Behaviour an actor runs.
///
/// Any implementation can be spawned or invoked as a child. `transition`
/// must not perform side effects directly; it queues them on the scope
/// with [`ActorScope::defer`].
pub trait ActorLogic {
    fn initial_snapshot(&self, scope: &ActorScope, input: &Value) -> Result<AnySnapshot, ActorError>;

    fn transition(
        &self,
        snapshot: &AnySnapshot,
        event: &Event,
        scope: &ActorScope,
    ) -> Result<AnySnapshot, ActorError>;

    fn persisted_snapshot(&self, snapshot: &AnySnapshot) -> Result<serde_json::Value, PersistError>;

    fn restore_snapshot(
        &self,
        persisted: &serde_json::Value,
        scope: &ActorScope,
    ) -> Result<AnySnapshot, ActorError>;

    /// Called once when the actor starts, before its mailbox opens.
    fn start(&self, _snapshot: &AnySnapshot, _scope: &ActorScope) -> Result<(), ActorError> {
        Ok(())
    }
}

pub type Logic = Rc<dyn ActorLogic>;
