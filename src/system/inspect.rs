//! Read-only inspection stream.

use crate::actor::{AnySnapshot, SnapshotStatus};
use crate::core::{Event, StateValue};
use std::rc::Rc;

/// One transition taken during a microstep.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionSummary {
    pub source: String,
    pub targets: Vec<String>,
    pub event_type: String,
}

/// Notifications published by an actor system. Inspectors observe, they
/// never influence execution.
#[derive(Clone, Debug)]
pub enum InspectionEvent {
    ActorRegistered {
        session_id: String,
        actor_id: String,
        parent: Option<String>,
    },
    EventRelayed {
        source: Option<String>,
        target: String,
        event: Event,
    },
    SnapshotCommitted {
        session_id: String,
        event: Event,
        status: SnapshotStatus,
        snapshot: AnySnapshot,
    },
    Microstep {
        session_id: String,
        event: Event,
        value: StateValue,
        transitions: Vec<TransitionSummary>,
    },
}

impl InspectionEvent {
    /// Session id of the actor the notification is about.
    pub fn session_id(&self) -> &str {
        match self {
            InspectionEvent::ActorRegistered { session_id, .. }
            | InspectionEvent::SnapshotCommitted { session_id, .. }
            | InspectionEvent::Microstep { session_id, .. } => session_id,
            InspectionEvent::EventRelayed { target, .. } => target,
        }
    }
}

pub type Inspector = Rc<dyn Fn(&InspectionEvent)>;
