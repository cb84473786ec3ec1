//! Time sources for delayed events.

use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub type TimerId = u64;
pub type TimerCallback = Box<dyn FnOnce()>;

/// A `setTimeout`-style timer source.
///
/// Firing a timer is the only point where control re-enters an actor
/// system from outside.
pub trait Clock {
    /// Current time in milliseconds.
    fn now(&self) -> u64;

    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId;

    fn clear_timeout(&self, id: TimerId);
}

#[derive(Default)]
struct TimerQueue {
    next_id: TimerId,
    due: HashMap<TimerId, u64>,
    timers: BTreeMap<(u64, TimerId), TimerCallback>,
}

impl TimerQueue {
    fn insert(&mut self, due_at: u64, callback: TimerCallback) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.due.insert(id, due_at);
        self.timers.insert((due_at, id), callback);
        id
    }

    fn remove(&mut self, id: TimerId) {
        if let Some(due_at) = self.due.remove(&id) {
            self.timers.remove(&(due_at, id));
        }
    }

    /// Earliest timer due at or before `limit`.
    fn pop_due(&mut self, limit: u64) -> Option<(u64, TimerCallback)> {
        let key = *self.timers.keys().next()?;
        if key.0 > limit {
            return None;
        }
        self.due.remove(&key.1);
        self.timers.remove(&key).map(|callback| (key.0, callback))
    }

    fn len(&self) -> usize {
        self.timers.len()
    }
}

#[derive(Default)]
struct SimulatedState {
    now: u64,
    queue: TimerQueue,
}

/// Virtual time, advanced explicitly.
///
/// Timers fire in due order; while a timer runs, [`Clock::now`] reports its
/// due time, so timers it arms are relative to that instant.
///
/// # Example
///
/// ```rust
/// use statecraft::system::{Clock, SimulatedClock};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let clock = SimulatedClock::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// clock.set_timeout(Box::new(move || flag.set(true)), 100);
///
/// clock.increment(99);
/// assert!(!fired.get());
/// clock.increment(1);
/// assert!(fired.get());
/// ```
#[derive(Clone, Default)]
pub struct SimulatedClock {
    state: Rc<RefCell<SimulatedState>>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `ms`, firing every timer that falls due.
    pub fn increment(&self, ms: u64) {
        let target = self.state.borrow().now.saturating_add(ms);
        self.advance_to(target);
    }

    /// Jump to an absolute time. Moving backwards only rewinds the reading.
    pub fn set(&self, now: u64) {
        if now < self.state.borrow().now {
            self.state.borrow_mut().now = now;
            return;
        }
        self.advance_to(now);
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    fn advance_to(&self, target: u64) {
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let next = state.queue.pop_due(target);
                if let Some((due_at, _)) = &next {
                    state.now = state.now.max(*due_at);
                }
                next
            };
            match next {
                Some((_, callback)) => callback(),
                None => break,
            }
        }
        self.state.borrow_mut().now = target;
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> u64 {
        self.state.borrow().now
    }

    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId {
        let mut state = self.state.borrow_mut();
        let due_at = state.now.saturating_add(delay_ms);
        state.queue.insert(due_at, callback)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.state.borrow_mut().queue.remove(id);
    }
}

/// Real time from `chrono`. There is no background thread: the host polls
/// [`WallClock::run_due`] from its own loop.
#[derive(Clone)]
pub struct WallClock {
    origin: DateTime<Utc>,
    queue: Rc<RefCell<TimerQueue>>,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            queue: Rc::new(RefCell::new(TimerQueue::default())),
        }
    }

    /// Fire every timer whose due time has passed. Returns how many fired.
    pub fn run_due(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.now();
            let next = self.queue.borrow_mut().pop_due(now);
            match next {
                Some((_, callback)) => {
                    callback();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> u64 {
        let elapsed = Utc::now().signed_duration_since(self.origin);
        u64::try_from(elapsed.num_milliseconds()).unwrap_or(0)
    }

    fn set_timeout(&self, callback: TimerCallback, delay_ms: u64) -> TimerId {
        let due_at = self.now().saturating_add(delay_ms);
        self.queue.borrow_mut().insert(due_at, callback)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.queue.borrow_mut().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label)) as TimerCallback
        };
        (log, make)
    }

    #[test]
    fn fires_in_due_order() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.set_timeout(make("late"), 200);
        clock.set_timeout(make("early"), 50);
        clock.set_timeout(make("tie"), 50);

        clock.increment(500);

        assert_eq!(*log.borrow(), vec!["early", "tie", "late"]);
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn huge_delays_saturate_instead_of_wrapping() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.increment(5);
        clock.set_timeout(make("never"), u64::MAX);

        clock.increment(1_000_000);

        assert!(log.borrow().is_empty());
        assert_eq!(clock.pending(), 1);
        assert_eq!(clock.now(), 1_000_005);
    }

    #[test]
    fn cleared_timers_do_not_fire() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        let id = clock.set_timeout(make("cancelled"), 10);
        clock.clear_timeout(id);

        clock.increment(20);

        assert!(log.borrow().is_empty());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn nested_timers_are_relative_to_fire_time() {
        let clock = SimulatedClock::new();
        let fired_at = Rc::new(RefCell::new(Vec::new()));
        let inner_clock = clock.clone();
        let sink = fired_at.clone();
        clock.set_timeout(
            Box::new(move || {
                sink.borrow_mut().push(inner_clock.now());
                let sink = sink.clone();
                let reader = inner_clock.clone();
                inner_clock.set_timeout(Box::new(move || sink.borrow_mut().push(reader.now())), 30);
            }),
            100,
        );

        clock.increment(1000);

        assert_eq!(*fired_at.borrow(), vec![100, 130]);
    }

    #[test]
    fn zero_delay_fires_on_zero_increment() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.set_timeout(make("now"), 0);
        clock.increment(0);
        assert_eq!(*log.borrow(), vec!["now"]);
    }

    #[test]
    fn wall_clock_runs_only_due_timers() {
        let clock = WallClock::new();
        let (log, make) = recorder();
        clock.set_timeout(make("immediate"), 0);
        clock.set_timeout(make("far"), 60_000);

        assert_eq!(clock.run_due(), 1);
        assert_eq!(*log.borrow(), vec!["immediate"]);
        assert_eq!(clock.pending(), 1);
    }
}
