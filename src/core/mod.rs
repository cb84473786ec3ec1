//! Core value types of the statechart.
//!
//! This module contains the pure data the rest of the crate is built on:
//! - Dynamic `Value` trees for context, payloads and outputs
//! - `Event` objects and descriptor matching
//! - `StateValue`, the serializable shape of an active configuration
//! - `Guard` predicates
//! - Immutable `HistoryValue` tracking
//!
//! Nothing in this module performs side effects.

mod event;
mod guard;
mod history;
mod state_value;
mod value;

pub use event::{descriptor_matches, has_infix_wildcard, Event, INIT_EVENT, STOP_EVENT, WILDCARD};
pub use guard::{Guard, GuardArgs, GuardFn, GuardScope};
pub use history::HistoryValue;
pub use state_value::StateValue;
pub use value::Value;
