//! Persistence error types.

use thiserror::Error;

/// Errors that can occur while persisting or restoring snapshots.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistError {
    /// Serialization to JSON failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Deserialization from JSON failed
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// A child actor was created from inline logic and has no source name
    #[error("An inline child actor cannot be persisted: '{id}'")]
    InlineActor { id: String },

    /// The persisted state value names a state the machine does not have
    #[error("Unknown state '{state}' in persisted snapshot of machine '{machine}'")]
    UnknownState { machine: String, state: String },

    /// A persisted child refers to logic the machine cannot resolve
    #[error("Cannot restore child '{id}': logic '{src}' not found")]
    UnknownSource { id: String, src: String },
}
