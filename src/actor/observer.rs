//! Snapshot observers and subscription handles.

use crate::actor::{ActorError, AnySnapshot};
use std::fmt;
use std::rc::Rc;

type NextFn = Rc<dyn Fn(&AnySnapshot)>;
type ErrorFn = Rc<dyn Fn(&ActorError)>;
type CompleteFn = Rc<dyn Fn()>;

/// Callbacks for an actor's snapshot stream.
///
/// `next` fires after every committed active or done snapshot, `error` once
/// when the actor fails, `complete` once when it finishes or stops.
#[derive(Clone, Default)]
pub struct Observer {
    pub(crate) next: Option<NextFn>,
    pub(crate) error: Option<ErrorFn>,
    pub(crate) complete: Option<CompleteFn>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_next(mut self, f: impl Fn(&AnySnapshot) + 'static) -> Self {
        self.next = Some(Rc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ActorError) + 'static) -> Self {
        self.error = Some(Rc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + 'static) -> Self {
        self.complete = Some(Rc::new(f));
        self
    }

    pub fn has_error_handler(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

/// Handle returned by `subscribe` and `on`. Dropping it does not
/// unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    unsubscribe: Box<dyn Fn()>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl Fn() + 'static) -> Self {
        Self {
            unsubscribe: Box::new(unsubscribe),
        }
    }

    pub fn unsubscribe(&self) {
        (self.unsubscribe)();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}
