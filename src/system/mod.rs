//! The actor system shared by one actor tree.
//!
//! A system owns the registry (session ids and optional system ids), the
//! delayed-event scheduler and the inspection bus. Every cross-actor
//! delivery goes through [`ActorSystem::relay`], which enqueues into the
//! target's mailbox rather than calling into it.

mod clock;
mod inspect;
mod scheduler;

pub use clock::{Clock, SimulatedClock, TimerCallback, TimerId, WallClock};
pub use inspect::{InspectionEvent, Inspector, TransitionSummary};
pub use scheduler::{ScheduledEvent, Scheduler};

use crate::actor::{dispatch_unhandled_error, ActorError, ActorRef, WeakActorRef};
use crate::core::{Event, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// Sink for the `log` action: `(actor, label, value)`.
pub type Logger = Rc<dyn Fn(&ActorRef, Option<&str>, &Value)>;

pub(crate) fn default_logger() -> Logger {
    Rc::new(|actor: &ActorRef, label: Option<&str>, value: &Value| {
        tracing::info!(actor = %actor.id(), label = label.unwrap_or(""), value = ?value, "log");
    })
}

pub(crate) struct SystemInner {
    id: Uuid,
    next_session: Cell<u64>,
    actors: RefCell<HashMap<String, WeakActorRef>>,
    keyed: RefCell<HashMap<String, WeakActorRef>>,
    inspectors: RefCell<Vec<(u64, Inspector)>>,
    next_inspector: Cell<u64>,
    pub(crate) scheduler: Scheduler,
    clock: Rc<dyn Clock>,
    logger: Logger,
    depth: Cell<usize>,
    unhandled: RefCell<Vec<ActorError>>,
}

impl SystemInner {
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        self.depth.set(self.depth.get() + 1);
        let result = f();
        self.depth.set(self.depth.get() - 1);
        if self.depth.get() == 0 {
            self.drain_unhandled();
        }
        result
    }

    pub(crate) fn relay(&self, source: Option<&ActorRef>, target: &ActorRef, event: Event) {
        tracing::trace!(
            source = source.map(ActorRef::session_id).unwrap_or(""),
            target = %target.session_id(),
            event = %event.event_type(),
            "relay"
        );
        self.inspect(InspectionEvent::EventRelayed {
            source: source.map(|s| s.session_id().to_string()),
            target: target.session_id().to_string(),
            event: event.clone(),
        });
        target.deliver(event);
    }

    fn inspect(&self, event: InspectionEvent) {
        let inspectors: Vec<Inspector> = self
            .inspectors
            .borrow()
            .iter()
            .map(|(_, inspector)| inspector.clone())
            .collect();
        for inspector in inspectors {
            inspector(&event);
        }
    }

    fn drain_unhandled(&self) {
        loop {
            let pending = std::mem::take(&mut *self.unhandled.borrow_mut());
            if pending.is_empty() {
                return;
            }
            for error in &pending {
                dispatch_unhandled_error(error);
            }
        }
    }
}

/// Handle to a system. Cheap to clone.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Rc<SystemInner>,
}

impl ActorSystem {
    pub(crate) fn new(clock: Rc<dyn Clock>, logger: Logger) -> Self {
        let inner = Rc::new_cyclic(|weak| SystemInner {
            id: Uuid::new_v4(),
            next_session: Cell::new(0),
            actors: RefCell::new(HashMap::new()),
            keyed: RefCell::new(HashMap::new()),
            inspectors: RefCell::new(Vec::new()),
            next_inspector: Cell::new(0),
            scheduler: Scheduler::new(clock.clone(), weak.clone()),
            clock,
            logger,
            depth: Cell::new(0),
            unhandled: RefCell::new(Vec::new()),
        });
        tracing::debug!(system = %inner.id, "actor system created");
        Self { inner }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Allocate the next session id, `x:<n>`.
    pub(crate) fn book_id(&self) -> String {
        let n = self.inner.next_session.get();
        self.inner.next_session.set(n + 1);
        format!("x:{n}")
    }

    pub(crate) fn register(&self, actor: &ActorRef) {
        self.inner
            .actors
            .borrow_mut()
            .insert(actor.session_id().to_string(), actor.downgrade());
    }

    pub(crate) fn unregister(&self, actor: &ActorRef) {
        self.inner.actors.borrow_mut().remove(actor.session_id());
        if let Some(system_id) = actor.system_id() {
            let mut keyed = self.inner.keyed.borrow_mut();
            let owned = keyed
                .get(system_id)
                .is_some_and(|entry| entry.session_id() == actor.session_id());
            if owned {
                keyed.remove(system_id);
            }
        }
    }

    /// Register `actor` under a system-wide id. Ids are unique per system.
    pub(crate) fn set(&self, system_id: &str, actor: &ActorRef) -> Result<(), ActorError> {
        let mut keyed = self.inner.keyed.borrow_mut();
        if let Some(existing) = keyed.get(system_id) {
            if existing.session_id() != actor.session_id() && existing.upgrade().is_some() {
                return Err(ActorError::SystemIdTaken(system_id.to_string()));
            }
        }
        keyed.insert(system_id.to_string(), actor.downgrade());
        Ok(())
    }

    /// Look up an actor by system id.
    pub fn get(&self, system_id: &str) -> Option<ActorRef> {
        self.inner
            .keyed
            .borrow()
            .get(system_id)
            .and_then(WeakActorRef::upgrade)
    }

    /// Look up a started, live actor by session id.
    pub fn get_by_session(&self, session_id: &str) -> Option<ActorRef> {
        self.inner
            .actors
            .borrow()
            .get(session_id)
            .and_then(WeakActorRef::upgrade)
    }

    /// Subscribe to the inspection stream. Returns a handle for
    /// [`ActorSystem::uninspect`].
    pub fn inspect(&self, inspector: impl Fn(&InspectionEvent) + 'static) -> u64 {
        let id = self.inner.next_inspector.get() + 1;
        self.inner.next_inspector.set(id);
        self.inner
            .inspectors
            .borrow_mut()
            .push((id, Rc::new(inspector)));
        id
    }

    pub fn uninspect(&self, id: u64) {
        self.inner
            .inspectors
            .borrow_mut()
            .retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn emit_inspection(&self, event: InspectionEvent) {
        self.inner.inspect(event);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub(crate) fn logger(&self) -> Logger {
        self.inner.logger.clone()
    }

    pub(crate) fn relay(&self, source: Option<&ActorRef>, target: &ActorRef, event: Event) {
        self.inner.relay(source, target, event);
    }

    /// Run a runtime entry point. Unhandled errors raised inside are
    /// reported once the outermost entry point returns.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.run(f)
    }

    pub(crate) fn report_unhandled(&self, error: ActorError) {
        self.inner.unhandled.borrow_mut().push(error);
        if self.inner.depth.get() == 0 {
            self.inner.drain_unhandled();
        }
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("id", &self.inner.id)
            .field("actors", &self.inner.actors.borrow().len())
            .finish()
    }
}
