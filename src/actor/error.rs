//! Actor error types and the unhandled-error sink.

use crate::checkpoint::PersistError;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

/// Errors raised while evaluating guards, resolving or executing actions,
/// or driving an actor.
///
/// Errors are values: they are stored on snapshots (`status == Error`) and
/// travel to parents inside `xstate.error.actor.<id>` events, so they are
/// cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActorError {
    #[error("Unable to evaluate guard '{guard}' in transition for event '{event}' in state node '{state}': {message}")]
    Guard {
        guard: String,
        event: String,
        state: String,
        message: String,
    },

    #[error("Action '{action}' failed: {message}")]
    Action { action: String, message: String },

    /// Raised by user code.
    #[error("{0}")]
    Custom(String),

    #[error("Unable to send event to actor '{target}' from '{source_id}'")]
    UnknownTarget { target: String, source_id: String },

    #[error("Actor logic '{0}' was not found")]
    LogicNotFound(String),

    #[error("{kind} '{name}' is not implemented")]
    NotImplemented { kind: &'static str, name: String },

    #[error("Actor with system ID '{0}' already exists")]
    SystemIdTaken(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("A non-root actor cannot be stopped directly")]
    NotRoot,

    #[error("Cannot stop actor '{child}': it is not a child of '{parent}'")]
    ChildNotOwned { child: String, parent: String },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl ActorError {
    /// Convenience constructor for user-raised errors.
    pub fn custom(message: impl Into<String>) -> Self {
        ActorError::Custom(message.into())
    }
}

type ErrorHook = Rc<dyn Fn(&ActorError)>;

thread_local! {
    static UNHANDLED_ERROR_HOOK: RefCell<Option<ErrorHook>> = const { RefCell::new(None) };
}

/// Install the sink for errors no observer handled. Returns the previous
/// hook, if any.
///
/// The runtime is single-threaded, so the sink is per thread. Without a hook
/// unhandled errors are logged through `tracing::error!`.
pub fn set_unhandled_error_hook<F>(hook: F) -> Option<Rc<dyn Fn(&ActorError)>>
where
    F: Fn(&ActorError) + 'static,
{
    UNHANDLED_ERROR_HOOK.with(|slot| slot.borrow_mut().replace(Rc::new(hook)))
}

/// Remove the installed sink, restoring the logging default.
pub fn clear_unhandled_error_hook() {
    UNHANDLED_ERROR_HOOK.with(|slot| slot.borrow_mut().take());
}

pub(crate) fn dispatch_unhandled_error(error: &ActorError) {
    let hook = UNHANDLED_ERROR_HOOK.with(|slot| slot.borrow().clone());
    match hook {
        Some(hook) => hook(error),
        None => tracing::error!(error = %error, "unhandled actor error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn custom_error_displays_message() {
        assert_eq!(ActorError::custom("boom").to_string(), "boom");
    }

    #[test]
    fn guard_error_mentions_state_and_event() {
        let err = ActorError::Guard {
            guard: "isReady".into(),
            event: "GO".into(),
            state: "m.idle".into(),
            message: "boom".into(),
        };
        let text = err.to_string();
        assert!(text.contains("isReady"));
        assert!(text.contains("GO"));
        assert!(text.contains("m.idle"));
    }

    #[test]
    fn hook_receives_dispatched_errors() {
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        set_unhandled_error_hook(move |_| counter.set(counter.get() + 1));

        dispatch_unhandled_error(&ActorError::custom("x"));
        clear_unhandled_error_hook();
        dispatch_unhandled_error(&ActorError::custom("y"));

        assert_eq!(seen.get(), 1);
    }
}
