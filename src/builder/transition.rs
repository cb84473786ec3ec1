//! Builder for transition configurations.

use crate::core::{Guard, GuardArgs};
use crate::effects::Action;
use std::fmt;

/// One candidate transition for an event descriptor.
///
/// Built from a target string or [`TransitionConfig::targetless`], then
/// refined with a guard, actions and the `reenter` flag.
///
/// # Target syntax
///
/// - `"sibling"` or `"sibling.child"`: resolved from the source's parent
/// - `".child"`: resolved from the source itself
/// - `"#id"` or `"#id.child"`: absolute, by state node id
#[derive(Clone, Default)]
pub struct TransitionConfig {
    pub(crate) targets: Vec<String>,
    pub(crate) guard: Option<Guard>,
    pub(crate) actions: Vec<Action>,
    pub(crate) reenter: bool,
    pub(crate) description: Option<String>,
}

impl TransitionConfig {
    /// Create a transition to `target`.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            ..Self::default()
        }
    }

    /// Create a transition that runs actions without changing state.
    pub fn targetless() -> Self {
        Self::default()
    }

    /// Add another target (used for entering several parallel regions).
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Add a guard (optional).
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Add a guard using a closure (optional).
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&GuardArgs<'_>) -> bool + 'static,
    {
        self.guard = Some(Guard::new(predicate));
        self
    }

    pub fn action(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions<I, A>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Action>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Exit and re-enter the source even when the targets are its
    /// descendants.
    pub fn reenter(mut self, reenter: bool) -> Self {
        self.reenter = reenter;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&str> for TransitionConfig {
    fn from(target: &str) -> Self {
        TransitionConfig::to(target)
    }
}

impl From<String> for TransitionConfig {
    fn from(target: String) -> Self {
        TransitionConfig::to(target)
    }
}

impl fmt::Debug for TransitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionConfig")
            .field("targets", &self.targets)
            .field("guard", &self.guard.as_ref().map(Guard::describe))
            .field("actions", &self.actions)
            .field("reenter", &self.reenter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_converts_to_single_target() {
        let transition = TransitionConfig::from("green");
        assert_eq!(transition.targets, vec!["green".to_string()]);
        assert!(transition.guard.is_none());
        assert!(!transition.reenter);
    }

    #[test]
    fn targetless_has_no_targets() {
        let transition = TransitionConfig::targetless().action("log");
        assert!(transition.targets.is_empty());
        assert_eq!(transition.actions.len(), 1);
    }

    #[test]
    fn fluent_api_accumulates_targets_and_actions() {
        let transition = TransitionConfig::to(".a")
            .target(".b")
            .when(|_| true)
            .actions(["one", "two"])
            .reenter(true);

        assert_eq!(transition.targets, vec![".a".to_string(), ".b".to_string()]);
        assert!(transition.guard.is_some());
        assert_eq!(transition.actions.len(), 2);
        assert!(transition.reenter);
    }
}
