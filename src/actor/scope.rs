//! The capability handle logic receives while transitioning.

use crate::actor::cell::Deferred;
use crate::actor::{ActorError, ActorRef, Logic, ParentHandle, ProcessingStatus, SpawnOptions};
use crate::core::{Event, Value};
use crate::system::ActorSystem;

/// What a logic may do on behalf of the actor running it.
///
/// Side effects go through [`ActorScope::defer`] (run after the snapshot is
/// committed) or [`ActorScope::execute`] (run now if the actor is running,
/// otherwise deferred).
#[derive(Clone, Debug)]
pub struct ActorScope {
    actor: ActorRef,
}

impl ActorScope {
    pub(crate) fn new(actor: ActorRef) -> Self {
        Self { actor }
    }

    pub fn self_ref(&self) -> &ActorRef {
        &self.actor
    }

    pub fn id(&self) -> &str {
        self.actor.id()
    }

    pub fn session_id(&self) -> &str {
        self.actor.session_id()
    }

    pub fn system(&self) -> ActorSystem {
        self.actor.system()
    }

    pub fn parent(&self) -> Option<&ParentHandle> {
        self.actor.parent()
    }

    pub fn defer(&self, effect: impl FnOnce() -> Result<(), ActorError> + 'static) {
        let effect: Deferred = Box::new(effect);
        self.actor.defer(effect);
    }

    pub fn execute(
        &self,
        effect: impl FnOnce() -> Result<(), ActorError> + 'static,
    ) -> Result<(), ActorError> {
        if self.actor.status() == ProcessingStatus::Running {
            effect()
        } else {
            self.defer(effect);
            Ok(())
        }
    }

    /// Notify listeners registered with [`ActorRef::on`].
    pub fn emit(&self, event: &Event) {
        self.actor.emit(event);
    }

    pub fn log(&self, label: Option<&str>, value: &Value) {
        let logger = self.actor.system().logger();
        logger(&self.actor, label, value);
    }

    /// Create a child owned by this actor. It is not started.
    pub fn spawn(&self, logic: Logic, options: SpawnOptions) -> Result<ActorRef, ActorError> {
        ActorRef::spawn_child(&self.actor, logic, options)
    }

    /// Stop a child of this actor.
    pub fn stop_child(&self, child: &ActorRef) -> Result<(), ActorError> {
        if !self.actor.is_detached() && !self.actor.is_parent_of(child) {
            return Err(ActorError::ChildNotOwned {
                child: child.id().to_string(),
                parent: self.actor.id().to_string(),
            });
        }
        child.stop_internal();
        Ok(())
    }
}
