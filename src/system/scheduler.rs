//! Delayed-event scheduler.

use crate::actor::ActorRef;
use crate::core::Event;
use crate::system::clock::{Clock, TimerId};
use crate::system::SystemInner;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// A pending delayed send, keyed by `<source session id>.<id>`.
#[derive(Clone, Debug)]
pub struct ScheduledEvent {
    pub source: String,
    pub target: String,
    pub event: Event,
    pub delay: u64,
    pub id: String,
    pub started_at: u64,
}

struct Entry {
    scheduled: ScheduledEvent,
    timer: TimerId,
}

pub struct Scheduler {
    clock: Rc<dyn Clock>,
    system: Weak<SystemInner>,
    entries: RefCell<BTreeMap<String, Entry>>,
    anonymous: Cell<u64>,
}

fn entry_key(source: &str, id: &str) -> String {
    format!("{source}.{id}")
}

impl Scheduler {
    pub(crate) fn new(clock: Rc<dyn Clock>, system: Weak<SystemInner>) -> Self {
        Self {
            clock,
            system,
            entries: RefCell::new(BTreeMap::new()),
            anonymous: Cell::new(0),
        }
    }

    /// Deliver `event` to `target` after `delay` ms. Scheduling the same
    /// `(source, id)` again replaces the pending send.
    pub fn schedule(
        &self,
        source: &ActorRef,
        target: &ActorRef,
        event: Event,
        delay: u64,
        id: Option<String>,
    ) {
        let id = id.unwrap_or_else(|| {
            self.anonymous.set(self.anonymous.get() + 1);
            format!("scheduled:{}", self.anonymous.get())
        });
        let key = entry_key(source.session_id(), &id);
        self.cancel_key(&key);

        let scheduled = ScheduledEvent {
            source: source.session_id().to_string(),
            target: target.session_id().to_string(),
            event: event.clone(),
            delay,
            id: id.clone(),
            started_at: self.clock.now(),
        };

        let system = self.system.clone();
        let source_ref = source.downgrade();
        let target_ref = target.downgrade();
        let fire_key = key.clone();
        let timer = self.clock.set_timeout(
            Box::new(move || {
                let Some(system) = system.upgrade() else {
                    return;
                };
                system.scheduler.entries.borrow_mut().remove(&fire_key);
                let Some(target) = target_ref.upgrade() else {
                    return;
                };
                let source = source_ref.upgrade();
                tracing::trace!(key = %fire_key, target = %target.session_id(), "scheduled event fired");
                system.run(|| system.relay(source.as_ref(), &target, event));
            }),
            delay,
        );

        tracing::trace!(%key, delay, "event scheduled");
        self.entries
            .borrow_mut()
            .insert(key, Entry { scheduled, timer });
    }

    pub fn cancel(&self, source: &ActorRef, id: &str) {
        self.cancel_key(&entry_key(source.session_id(), id));
    }

    /// Cancel every pending send originating from `source`.
    pub fn cancel_all(&self, source: &ActorRef) {
        let prefix = format!("{}.", source.session_id());
        let keys: Vec<String> = self
            .entries
            .borrow()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in keys {
            self.cancel_key(&key);
        }
    }

    /// Pending sends in key order.
    pub fn scheduled(&self) -> Vec<ScheduledEvent> {
        self.entries
            .borrow()
            .values()
            .map(|entry| entry.scheduled.clone())
            .collect()
    }

    fn cancel_key(&self, key: &str) {
        let removed = self.entries.borrow_mut().remove(key);
        if let Some(entry) = removed {
            tracing::trace!(%key, "scheduled event cancelled");
            self.clock.clear_timeout(entry.timer);
        }
    }
}
