//! Events and event descriptors.
//!
//! Event types are dot-delimited tokens (`"a.b.c"`). Transition descriptors
//! may end in a `*` token (`"a.b.*"`) or be the bare wildcard `"*"`.

use crate::actor::{ActorError, AnySnapshot};
use crate::core::Value;
use std::fmt;

pub const INIT_EVENT: &str = "xstate.init";
pub const STOP_EVENT: &str = "xstate.stop";
pub const WILDCARD: &str = "*";

const ERROR_ACTOR_PREFIX: &str = "xstate.error.actor";
const DONE_ACTOR_PREFIX: &str = "xstate.done.actor";
const DONE_STATE_PREFIX: &str = "xstate.done.state";
const SNAPSHOT_PREFIX: &str = "xstate.snapshot";
const AFTER_PREFIX: &str = "xstate.after";

/// An event object: a type plus an arbitrary payload.
///
/// Runtime-generated events additionally carry an error (for
/// `xstate.error.actor.*`) or a child snapshot (for `xstate.snapshot.*`).
///
/// # Example
///
/// ```rust
/// use statecraft::core::Event;
///
/// let event = Event::new("INC").with("by", 2);
/// assert_eq!(event.event_type(), "INC");
/// assert_eq!(event.get("by").and_then(|v| v.as_i64()), Some(2));
/// ```
#[derive(Clone)]
pub struct Event {
    event_type: String,
    data: Value,
    error: Option<ActorError>,
    snapshot: Option<AnySnapshot>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Value::object(),
            error: None,
            snapshot: None,
        }
    }

    /// Attach a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key, value);
        self
    }

    /// Replace the whole payload. Non-object payloads are stored under `"data"`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = if data.is_object() {
            data
        } else {
            Value::object().with("data", data)
        };
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    pub fn snapshot(&self) -> Option<&AnySnapshot> {
        self.snapshot.as_ref()
    }

    /// `output` payload of done events.
    pub fn output(&self) -> Option<&Value> {
        self.data.get("output")
    }

    /// `input` payload of the init event.
    pub fn input(&self) -> Option<&Value> {
        self.data.get("input")
    }

    pub fn is_error_actor_event(&self) -> bool {
        self.event_type.starts_with(ERROR_ACTOR_PREFIX)
    }

    pub fn init(input: Value) -> Self {
        Event::new(INIT_EVENT).with("input", input)
    }

    pub fn stop() -> Self {
        Event::new(STOP_EVENT)
    }

    pub fn done_actor(actor_id: &str, output: Option<Value>) -> Self {
        Event::new(format!("{DONE_ACTOR_PREFIX}.{actor_id}"))
            .with("actorId", actor_id)
            .with("output", output)
    }

    pub fn error_actor(actor_id: &str, error: ActorError) -> Self {
        let mut event = Event::new(format!("{ERROR_ACTOR_PREFIX}.{actor_id}"))
            .with("actorId", actor_id)
            .with("error", error.to_string());
        event.error = Some(error);
        event
    }

    pub fn done_state(state_id: &str, output: Option<Value>) -> Self {
        Event::new(format!("{DONE_STATE_PREFIX}.{state_id}")).with("output", output)
    }

    pub fn child_snapshot(actor_id: &str, snapshot: AnySnapshot) -> Self {
        let mut event = Event::new(format!("{SNAPSHOT_PREFIX}.{actor_id}"));
        event.snapshot = Some(snapshot);
        event
    }

    /// Event type used for a delayed (`after`) transition.
    pub fn after_type(delay: &str, state_id: &str) -> String {
        format!("{AFTER_PREFIX}.{delay}.{state_id}")
    }

    pub fn done_state_type(state_id: &str) -> String {
        format!("{DONE_STATE_PREFIX}.{state_id}")
    }

    pub fn done_actor_type(actor_id: &str) -> String {
        format!("{DONE_ACTOR_PREFIX}.{actor_id}")
    }

    pub fn error_actor_type(actor_id: &str) -> String {
        format!("{ERROR_ACTOR_PREFIX}.{actor_id}")
    }

    pub fn snapshot_type(actor_id: &str) -> String {
        format!("{SNAPSHOT_PREFIX}.{actor_id}")
    }
}

impl From<&str> for Event {
    fn from(event_type: &str) -> Self {
        Event::new(event_type)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_type == other.event_type && self.data == other.data && self.error == other.error
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Event");
        s.field("type", &self.event_type).field("data", &self.data);
        if let Some(error) = &self.error {
            s.field("error", error);
        }
        if self.snapshot.is_some() {
            s.field("snapshot", &"..");
        }
        s.finish()
    }
}

/// Check whether a transition descriptor accepts an event type.
///
/// A `*` token matches any remainder, including none: `"a.*"` accepts both
/// `"a.b.c"` and `"a"`.
pub fn descriptor_matches(descriptor: &str, event_type: &str) -> bool {
    if descriptor == WILDCARD {
        return true;
    }
    if descriptor == event_type {
        return true;
    }
    if !descriptor.ends_with(".*") {
        return false;
    }
    let mut event_tokens = event_type.split('.');
    let partial: Vec<&str> = descriptor.split('.').collect();
    for (index, token) in partial.iter().enumerate() {
        if *token == WILDCARD {
            return index == partial.len() - 1;
        }
        if Some(*token) != event_tokens.next() {
            return false;
        }
    }
    true
}

/// True when a `*` appears anywhere but as a whole last token.
pub fn has_infix_wildcard(descriptor: &str) -> bool {
    let tokens: Vec<&str> = descriptor.split('.').collect();
    tokens
        .iter()
        .enumerate()
        .any(|(index, token)| token.contains('*') && (index != tokens.len() - 1 || *token != WILDCARD))
}
