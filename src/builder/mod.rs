//! Fluent and declarative machine configuration.
//!
//! [`MachineConfig`] is the entry point. States are described with
//! [`StateConfig`], transitions with [`TransitionConfig`] and invoked
//! children with [`InvokeConfig`]. A configuration can also be read from
//! JSON with [`MachineConfig::from_json`].
//!
//! `build` validates the whole tree and reports every problem it finds in
//! one [`BuildError`].

pub mod error;
mod json;
pub mod machine;
pub mod state;
pub mod transition;

pub use error::{BuildError, ConfigIssue};
pub use machine::MachineConfig;
pub use state::{InvokeConfig, StateConfig};
pub use transition::TransitionConfig;
