//! Actor handles and the processing loop.

use crate::actor::logic::BasicSnapshot;
use crate::actor::{
    downcast_snapshot, ActorError, ActorScope, AnySnapshot, Logic, LogicSnapshot, Mailbox, Observer,
    SnapshotStatus, Subscription,
};
use crate::checkpoint::PersistError;
use crate::core::{Event, Value, STOP_EVENT};
use crate::machine::MachineSnapshot;
use crate::system::{default_logger, ActorSystem, Clock, InspectionEvent, Logger, SimulatedClock};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// Processing lifecycle. Moves forward only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessingStatus {
    NotStarted,
    Running,
    Stopped,
}

pub(crate) type Deferred = Box<dyn FnOnce() -> Result<(), ActorError>>;
type Listener = Rc<dyn Fn(&Event)>;

/// Options for a root actor.
#[derive(Clone, Default)]
pub struct ActorOptions {
    pub id: Option<String>,
    pub system_id: Option<String>,
    pub input: Value,
    /// Persisted snapshot to restore instead of computing an initial one.
    pub snapshot: Option<serde_json::Value>,
    pub clock: Option<Rc<dyn Clock>>,
    pub logger: Option<Logger>,
    pub inspect: Option<Rc<dyn Fn(&InspectionEvent)>>,
}

impl ActorOptions {
    pub fn new() -> Self {
        Self::default()
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
        self.input = input.into();
        self
    }

    pub fn snapshot(mut self, persisted: serde_json::Value) -> Self {
        self.snapshot = Some(persisted);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }

    pub fn logger(mut self, logger: impl Fn(&ActorRef, Option<&str>, &Value) + 'static) -> Self {
        self.logger = Some(Rc::new(logger));
        self
    }

    pub fn inspect(mut self, inspector: impl Fn(&InspectionEvent) + 'static) -> Self {
        self.inspect = Some(Rc::new(inspector));
        self
    }
}

/// Options for a child created by a parent's logic.
#[derive(Clone, Debug, Default)]
pub struct SpawnOptions {
    pub id: Option<String>,
    pub system_id: Option<String>,
    pub input: Value,
    /// Relay `xstate.snapshot.<id>` to the parent on every active snapshot.
    pub sync_snapshot: bool,
    /// Persistable logic name; children without one cannot be persisted.
    pub src: Option<String>,
    pub(crate) snapshot: Option<serde_json::Value>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
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
        self.input = input.into();
        self
    }

    pub fn sync_snapshot(mut self, sync: bool) -> Self {
        self.sync_snapshot = sync;
        self
    }
}

/// Capability to send to a parent. Holds no ownership of it.
#[derive(Clone)]
pub struct ParentHandle {
    cell: Weak<ActorCell>,
    session_id: String,
}

impl ParentHandle {
    fn new(parent: &ActorRef) -> Self {
        Self {
            cell: Rc::downgrade(&parent.cell),
            session_id: parent.cell.session_id.clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Relay `event` to the parent on behalf of `from`. A no-op once the
    /// parent is gone.
    pub fn send(&self, from: &ActorRef, event: Event) {
        if let Some(parent) = self.actor() {
            from.system().relay(Some(from), &parent, event);
        }
    }

    pub(crate) fn actor(&self) -> Option<ActorRef> {
        self.cell.upgrade().map(|cell| ActorRef { cell })
    }
}

impl fmt::Debug for ParentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParentHandle").field(&self.session_id).finish()
    }
}

pub(crate) struct ActorCell {
    session_id: String,
    id: String,
    system_id: Option<String>,
    src: Option<String>,
    logic: Logic,
    system: ActorSystem,
    parent: Option<ParentHandle>,
    sync_snapshot: bool,
    input: Value,
    detached: bool,
    status: Cell<ProcessingStatus>,
    snapshot: RefCell<AnySnapshot>,
    mailbox: Mailbox<Event>,
    deferred: RefCell<VecDeque<Deferred>>,
    observers: RefCell<Vec<(u64, Observer)>>,
    listeners: RefCell<Vec<(u64, String, Listener)>>,
    next_subscription: Cell<u64>,
}

/// Reference to a running (or not yet started) actor.
///
/// Equality is identity: two refs are equal when they point at the same
/// actor session.
#[derive(Clone)]
pub struct ActorRef {
    cell: Rc<ActorCell>,
}

/// Non-owning reference used by registries and timers.
#[derive(Clone)]
pub(crate) struct WeakActorRef {
    cell: Weak<ActorCell>,
    session_id: String,
}

impl WeakActorRef {
    pub(crate) fn upgrade(&self) -> Option<ActorRef> {
        self.cell.upgrade().map(|cell| ActorRef { cell })
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }
}

struct Init {
    id: Option<String>,
    system_id: Option<String>,
    src: Option<String>,
    input: Value,
    snapshot: Option<serde_json::Value>,
    sync_snapshot: bool,
}

/// Create a root actor with its own system.
///
/// The actor computes its initial snapshot immediately but runs no side
/// effects until [`ActorRef::start`].
pub fn create_actor(logic: Logic, options: ActorOptions) -> ActorRef {
    let clock = options
        .clock
        .unwrap_or_else(|| Rc::new(SimulatedClock::new()));
    let system = ActorSystem::new(clock, options.logger.unwrap_or_else(default_logger));
    if let Some(inspector) = options.inspect {
        system.inspect(move |event| inspector(event));
    }
    let init = Init {
        id: options.id,
        system_id: options.system_id,
        src: None,
        input: options.input,
        snapshot: options.snapshot,
        sync_snapshot: false,
    };
    ActorRef::construct(logic, system, None, init, false)
}

impl ActorRef {
    fn construct(
        logic: Logic,
        system: ActorSystem,
        parent: Option<ParentHandle>,
        init: Init,
        detached: bool,
    ) -> Self {
        let persisted = init.snapshot.clone();
        let actor = ActorRef::allocate(logic, system, parent, init, detached);
        if !detached {
            actor.system().emit_inspection(InspectionEvent::ActorRegistered {
                session_id: actor.session_id().to_string(),
                actor_id: actor.id().to_string(),
                parent: actor.cell.parent.as_ref().map(|p| p.session_id().to_string()),
            });
            tracing::debug!(actor = %actor.id(), session = %actor.session_id(), "actor created");
        }
        actor.init_state(persisted.as_ref());
        actor
    }

    fn allocate(
        logic: Logic,
        system: ActorSystem,
        parent: Option<ParentHandle>,
        init: Init,
        detached: bool,
    ) -> Self {
        let session_id = system.book_id();
        let id = init.id.unwrap_or_else(|| session_id.clone());
        let cell = Rc::new_cyclic(|weak: &Weak<ActorCell>| {
            let weak = weak.clone();
            ActorCell {
                session_id,
                id,
                system_id: init.system_id,
                src: init.src,
                logic,
                system,
                parent,
                sync_snapshot: init.sync_snapshot,
                input: init.input,
                detached,
                status: Cell::new(ProcessingStatus::NotStarted),
                snapshot: RefCell::new(BasicSnapshot::placeholder()),
                mailbox: Mailbox::new(move |event: Event| {
                    if let Some(cell) = weak.upgrade() {
                        ActorRef { cell }.process(event);
                    }
                }),
                deferred: RefCell::new(VecDeque::new()),
                observers: RefCell::new(Vec::new()),
                listeners: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
            }
        });
        ActorRef { cell }
    }

    /// An actor that is never started or registered. Its scope collects
    /// side effects that are never executed.
    pub(crate) fn detached(logic: Logic) -> Self {
        let system = ActorSystem::new(Rc::new(SimulatedClock::new()), default_logger());
        let init = Init {
            id: None,
            system_id: None,
            src: None,
            input: Value::Null,
            snapshot: None,
            sync_snapshot: false,
        };
        ActorRef::allocate(logic, system, None, init, true)
    }

    pub(crate) fn spawn_child(
        parent: &ActorRef,
        logic: Logic,
        options: SpawnOptions,
    ) -> Result<ActorRef, ActorError> {
        let system_id = options.system_id.clone();
        let init = Init {
            id: options.id,
            system_id: options.system_id,
            src: options.src,
            input: options.input,
            snapshot: options.snapshot,
            sync_snapshot: options.sync_snapshot,
        };
        let child = ActorRef::construct(
            logic,
            parent.system(),
            Some(ParentHandle::new(parent)),
            init,
            parent.cell.detached,
        );
        if let Some(system_id) = system_id {
            if !parent.cell.detached {
                parent.system().set(&system_id, &child)?;
            }
        }
        Ok(child)
    }

    fn init_state(&self, persisted: Option<&serde_json::Value>) {
        let scope = self.scope();
        let result = match persisted {
            Some(persisted) => self.cell.logic.restore_snapshot(persisted, &scope),
            None => self.cell.logic.initial_snapshot(&scope, &self.cell.input),
        };
        let snapshot = result.unwrap_or_else(|error| {
            tracing::debug!(actor = %self.id(), error = %error, "initial snapshot failed");
            BasicSnapshot::errored(error)
        });
        *self.cell.snapshot.borrow_mut() = snapshot;
    }

    pub fn id(&self) -> &str {
        &self.cell.id
    }

    pub fn session_id(&self) -> &str {
        &self.cell.session_id
    }

    pub fn system_id(&self) -> Option<&str> {
        self.cell.system_id.as_deref()
    }

    /// Name the logic was resolved from, if it has one.
    pub fn src(&self) -> Option<&str> {
        self.cell.src.as_deref()
    }

    pub fn system(&self) -> ActorSystem {
        self.cell.system.clone()
    }

    pub fn logic(&self) -> Logic {
        self.cell.logic.clone()
    }

    pub fn parent(&self) -> Option<&ParentHandle> {
        self.cell.parent.as_ref()
    }

    pub fn sync_snapshot(&self) -> bool {
        self.cell.sync_snapshot
    }

    pub fn status(&self) -> ProcessingStatus {
        self.cell.status.get()
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> AnySnapshot {
        self.cell.snapshot.borrow().clone()
    }

    pub fn snapshot_as<T: LogicSnapshot>(&self) -> Option<Rc<T>> {
        downcast_snapshot::<T>(&self.snapshot())
    }

    pub fn machine_snapshot(&self) -> Option<Rc<MachineSnapshot>> {
        self.snapshot_as::<MachineSnapshot>()
    }

    pub fn persisted_snapshot(&self) -> Result<serde_json::Value, PersistError> {
        self.cell.logic.persisted_snapshot(&self.snapshot())
    }

    pub(crate) fn scope(&self) -> ActorScope {
        ActorScope::new(self.clone())
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.cell.detached
    }

    pub(crate) fn downgrade(&self) -> WeakActorRef {
        WeakActorRef {
            cell: Rc::downgrade(&self.cell),
            session_id: self.cell.session_id.clone(),
        }
    }

    pub(crate) fn defer(&self, effect: Deferred) {
        self.cell.deferred.borrow_mut().push_back(effect);
    }

    pub(crate) fn is_parent_of(&self, child: &ActorRef) -> bool {
        child
            .parent()
            .is_some_and(|parent| parent.session_id() == self.session_id())
    }

    /// Start processing. Starting twice, or after a stop, does nothing.
    pub fn start(&self) -> &Self {
        let system = self.system();
        system.run(|| self.start_internal());
        self
    }

    pub(crate) fn start_internal(&self) {
        if self.status() != ProcessingStatus::NotStarted {
            return;
        }

        if self.cell.sync_snapshot {
            if let Some(parent) = self.cell.parent.clone() {
                let child = self.downgrade();
                self.subscribe(Observer::new().on_next(move |snapshot| {
                    if snapshot.status() != SnapshotStatus::Active {
                        return;
                    }
                    if let Some(child) = child.upgrade() {
                        parent.send(&child, Event::child_snapshot(child.id(), snapshot.clone()));
                    }
                }));
            }
        }

        let system = self.system();
        system.register(self);
        if let Some(system_id) = self.system_id() {
            if let Err(error) = system.set(system_id, self) {
                tracing::warn!(actor = %self.id(), error = %error, "system id already taken");
            }
        }
        self.cell.status.set(ProcessingStatus::Running);
        tracing::debug!(actor = %self.id(), session = %self.session_id(), "actor started");

        let init_event = Event::init(self.cell.input.clone());
        system.emit_inspection(InspectionEvent::EventRelayed {
            source: self.cell.parent.as_ref().map(|p| p.session_id().to_string()),
            target: self.session_id().to_string(),
            event: init_event.clone(),
        });

        let snapshot = self.snapshot();
        match snapshot.status() {
            SnapshotStatus::Done => {
                self.update(snapshot, &init_event);
                return;
            }
            SnapshotStatus::Error => {
                let error = snapshot_error(&snapshot);
                self.error(error);
                return;
            }
            _ => {}
        }

        let scope = self.scope();
        if let Err(error) = self.cell.logic.start(&snapshot, &scope) {
            *self.cell.snapshot.borrow_mut() = snapshot.with_error(error.clone());
            self.error(error);
            return;
        }

        self.update(snapshot, &init_event);
        self.cell.mailbox.start();
    }

    /// Deliver an event through the system relay.
    ///
    /// Events sent before [`ActorRef::start`] are queued and processed in
    /// order once the actor starts. Events sent to a stopped actor are
    /// dropped.
    pub fn send(&self, event: impl Into<Event>) {
        let event = event.into();
        let system = self.system();
        system.run(|| system.relay(None, self, event));
    }

    pub(crate) fn deliver(&self, event: Event) {
        if self.status() == ProcessingStatus::Stopped {
            tracing::debug!(
                actor = %self.id(),
                event = %event.event_type(),
                "event sent to stopped actor was dropped"
            );
            return;
        }
        self.cell.mailbox.enqueue(event);
    }

    /// Stop a root actor. Children are stopped by their parents.
    pub fn stop(&self) -> Result<(), ActorError> {
        if self.cell.parent.is_some() {
            return Err(ActorError::NotRoot);
        }
        let system = self.system();
        system.run(|| self.stop_internal());
        Ok(())
    }

    pub(crate) fn stop_internal(&self) {
        match self.status() {
            ProcessingStatus::Stopped => {}
            ProcessingStatus::NotStarted => {
                self.cell.mailbox.clear();
                self.cell.status.set(ProcessingStatus::Stopped);
                self.system().unregister(self);
            }
            ProcessingStatus::Running => {
                self.cell.mailbox.clear();
                self.cell.mailbox.enqueue(Event::stop());
            }
        }
    }

    /// Observe committed snapshots.
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        let id = self.next_subscription_id();
        if self.status() == ProcessingStatus::Stopped {
            if let Some(complete) = &observer.complete {
                complete();
            }
            return Subscription::new(|| {});
        }
        self.cell.observers.borrow_mut().push((id, observer));
        let weak = Rc::downgrade(&self.cell);
        Subscription::new(move || {
            if let Some(cell) = weak.upgrade() {
                cell.observers.borrow_mut().retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Shorthand for an observer with only `next`.
    pub fn subscribe_fn(&self, next: impl Fn(&AnySnapshot) + 'static) -> Subscription {
        self.subscribe(Observer::new().on_next(next))
    }

    /// Listen for events emitted by this actor's logic. `"*"` receives all.
    pub fn on(&self, event_type: impl Into<String>, handler: impl Fn(&Event) + 'static) -> Subscription {
        let id = self.next_subscription_id();
        self.cell
            .listeners
            .borrow_mut()
            .push((id, event_type.into(), Rc::new(handler)));
        let weak = Rc::downgrade(&self.cell);
        Subscription::new(move || {
            if let Some(cell) = weak.upgrade() {
                cell.listeners.borrow_mut().retain(|(existing, _, _)| *existing != id);
            }
        })
    }

    pub(crate) fn emit(&self, event: &Event) {
        let listeners: Vec<Listener> = self
            .cell
            .listeners
            .borrow()
            .iter()
            .filter(|(_, event_type, _)| event_type == event.event_type() || event_type == "*")
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn next_subscription_id(&self) -> u64 {
        let id = self.cell.next_subscription.get() + 1;
        self.cell.next_subscription.set(id);
        id
    }

    fn process(&self, event: Event) {
        let snapshot = self.snapshot();
        let scope = self.scope();
        match self.cell.logic.transition(&snapshot, &event, &scope) {
            Ok(next) => {
                self.update(next, &event);
                if event.event_type() == STOP_EVENT {
                    self.stop_procedure();
                    self.complete();
                }
            }
            Err(error) => {
                tracing::warn!(
                    actor = %self.id(),
                    event = %event.event_type(),
                    error = %error,
                    "transition failed"
                );
                self.cell.deferred.borrow_mut().clear();
                *self.cell.snapshot.borrow_mut() = snapshot.with_error(error.clone());
                self.error(error);
            }
        }
    }

    fn update(&self, snapshot: AnySnapshot, event: &Event) {
        *self.cell.snapshot.borrow_mut() = snapshot.clone();

        loop {
            let next = self.cell.deferred.borrow_mut().pop_front();
            let Some(effect) = next else {
                break;
            };
            if let Err(error) = effect() {
                tracing::warn!(actor = %self.id(), error = %error, "deferred effect failed");
                self.cell.deferred.borrow_mut().clear();
                *self.cell.snapshot.borrow_mut() = snapshot.with_error(error);
                break;
            }
        }

        let committed = self.snapshot();
        match committed.status() {
            SnapshotStatus::Active => self.notify(&committed),
            SnapshotStatus::Done => {
                self.notify(&committed);
                self.stop_procedure();
                self.complete();
                if let Some(parent) = &self.cell.parent {
                    parent.send(self, Event::done_actor(self.id(), committed.output().cloned()));
                }
            }
            SnapshotStatus::Error => self.error(snapshot_error(&committed)),
            SnapshotStatus::Stopped => {}
        }

        self.system().emit_inspection(InspectionEvent::SnapshotCommitted {
            session_id: self.session_id().to_string(),
            event: event.clone(),
            status: committed.status(),
            snapshot: committed,
        });
    }

    fn notify(&self, snapshot: &AnySnapshot) {
        let observers: Vec<Observer> = self
            .cell
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            if let Some(next) = &observer.next {
                next(snapshot);
            }
        }
    }

    fn complete(&self) {
        let observers = std::mem::take(&mut *self.cell.observers.borrow_mut());
        for (_, observer) in observers {
            if let Some(complete) = &observer.complete {
                complete();
            }
        }
    }

    fn error(&self, error: ActorError) {
        tracing::debug!(actor = %self.id(), error = %error, "actor errored");
        self.stop_procedure();
        self.report_error(&error);
        if let Some(parent) = &self.cell.parent {
            parent.send(self, Event::error_actor(self.id(), error));
        }
    }

    fn report_error(&self, error: &ActorError) {
        let observers = std::mem::take(&mut *self.cell.observers.borrow_mut());
        if observers.is_empty() {
            if self.cell.parent.is_none() {
                self.system().report_unhandled(error.clone());
            }
            return;
        }
        let mut unhandled = false;
        for (_, observer) in observers {
            match &observer.error {
                Some(on_error) => on_error(error),
                None => unhandled = true,
            }
        }
        if unhandled {
            self.system().report_unhandled(error.clone());
        }
    }

    fn stop_procedure(&self) {
        if self.status() != ProcessingStatus::Running {
            return;
        }
        let system = self.system();
        system.scheduler().cancel_all(self);
        self.cell.mailbox.clear();
        self.cell.mailbox.deactivate();
        self.cell.status.set(ProcessingStatus::Stopped);
        system.unregister(self);
        tracing::debug!(actor = %self.id(), session = %self.session_id(), "actor stopped");
    }
}

fn snapshot_error(snapshot: &AnySnapshot) -> ActorError {
    snapshot
        .error()
        .cloned()
        .unwrap_or_else(|| ActorError::custom("actor entered an error state"))
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.cell.id)
            .field("session_id", &self.cell.session_id)
            .field("status", &self.cell.status.get())
            .finish()
    }
}
