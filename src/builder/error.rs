//! Build errors for machine configurations.

use thiserror::Error;

/// A single problem found while compiling a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("Initial state '{initial}' not found on state node '{state}'")]
    UnknownInitial { state: String, initial: String },

    #[error("Compound state node '{state}' has no child state to enter initially")]
    MissingInitial { state: String },

    #[error("Target '{target}' of transition on '{event}' from '{state}' does not exist")]
    UnknownTarget {
        state: String,
        event: String,
        target: String,
    },

    #[error("Duplicate state node id '{id}'")]
    DuplicateId { id: String },

    #[error("Invalid event descriptor '{descriptor}' on '{state}': wildcards must be the last token")]
    InfixWildcard { state: String, descriptor: String },

    #[error("Final state node '{state}' cannot have child states")]
    FinalWithChildren { state: String },

    #[error("History state node '{state}' cannot have child states")]
    HistoryWithChildren { state: String },

    #[error("Parallel state node '{state}' cannot declare an initial state")]
    ParallelInitial { state: String },

    #[error("History state node '{state}' must have a parent")]
    RootHistory { state: String },
}

/// Errors that can occur when building state machines.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// Every problem found in the configuration, in document order.
    #[error("Invalid machine configuration: {}", describe(.0))]
    Invalid(Vec<ConfigIssue>),

    #[error("Invalid JSON configuration: {0}")]
    Json(String),
}

impl BuildError {
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            BuildError::Invalid(issues) => issues,
            BuildError::Json(_) => &[],
        }
    }
}

fn describe(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
