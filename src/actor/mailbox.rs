//! Per-actor FIFO with re-entrant enqueue.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// Strict FIFO of pending items for one actor.
///
/// The front slot holds the item currently being processed (taken out, so
/// the slot is `None` while the handler runs). Enqueueing during a flush
/// appends behind it; the running flush picks the new item up once the
/// current one is done. No `RefCell` borrow is held across the handler.
pub struct Mailbox<T> {
    queue: RefCell<VecDeque<Option<T>>>,
    active: Cell<bool>,
    process: Box<dyn Fn(T)>,
}

impl<T> Mailbox<T> {
    pub fn new(process: impl Fn(T) + 'static) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            active: Cell::new(false),
            process: Box::new(process),
        }
    }

    /// Open the mailbox and drain anything queued so far.
    pub fn start(&self) {
        self.active.set(true);
        self.flush();
    }

    /// Stop processing. Items enqueued afterwards are held, never handled.
    pub fn deactivate(&self) {
        self.active.set(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue(&self, item: T) {
        let was_idle = {
            let mut queue = self.queue.borrow_mut();
            let idle = queue.is_empty();
            queue.push_back(Some(item));
            idle
        };
        if was_idle && self.active.get() {
            self.flush();
        }
    }

    /// Drop pending items while keeping the one in flight.
    pub fn clear(&self) {
        self.queue.borrow_mut().truncate(1);
    }

    fn flush(&self) {
        loop {
            let next = {
                let mut queue = self.queue.borrow_mut();
                match queue.front_mut() {
                    Some(slot) => slot.take(),
                    None => break,
                }
            };
            if let Some(item) = next {
                if self.active.get() {
                    (self.process)(item);
                } else {
                    // stopped mid-flush: leave it queued
                    if let Some(slot) = self.queue.borrow_mut().front_mut() {
                        *slot = Some(item);
                    }
                    break;
                }
            }
            self.queue.borrow_mut().pop_front();
        }
    }
}
