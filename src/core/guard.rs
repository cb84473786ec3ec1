//! Guard predicates for controlling transitions.
//!
//! Guards are pure boolean functions of `(context, event, params)`. They form
//! a closed family: named references resolved through the machine's
//! implementation table, inline closures, the `not`/`and`/`or` combinators,
//! and `state_in` checks against the current configuration.

use crate::actor::ActorError;
use crate::core::{Event, Value};
use std::fmt;
use std::rc::Rc;

/// Arguments passed to guard predicates.
pub struct GuardArgs<'a> {
    pub context: &'a Value,
    pub event: &'a Event,
    pub params: &'a Value,
}

/// What a guard needs from its surroundings to be evaluated.
pub trait GuardScope {
    /// Resolve a named guard from the implementation table.
    fn lookup_guard(&self, name: &str) -> Option<&Guard>;

    /// True if the state addressed by `state` (an `#id` or a dot path from the
    /// root) is active.
    fn is_in(&self, state: &str) -> bool;
}

pub type GuardFn = Rc<dyn Fn(&GuardArgs<'_>) -> Result<bool, ActorError>>;

/// Pure predicate that determines if a transition can be taken.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{Event, Guard, GuardArgs, GuardScope, Value};
///
/// struct NoScope;
/// impl GuardScope for NoScope {
///     fn lookup_guard(&self, _: &str) -> Option<&Guard> { None }
///     fn is_in(&self, _: &str) -> bool { false }
/// }
///
/// let below_two = Guard::new(|args: &GuardArgs| {
///     args.context.get("count").and_then(Value::as_i64).unwrap_or(0) < 2
/// });
///
/// let context = Value::object().with("count", 1);
/// let event = Event::new("INC");
/// let params = Value::Null;
/// let args = GuardArgs { context: &context, event: &event, params: &params };
/// assert!(below_two.check(&args, &NoScope).unwrap());
/// assert!(!Guard::not(below_two).check(&args, &NoScope).unwrap());
/// ```
#[derive(Clone)]
pub enum Guard {
    Named { name: String, params: Value },
    Inline(GuardFn),
    Not(Box<Guard>),
    And(Vec<Guard>),
    Or(Vec<Guard>),
    StateIn(String),
}

impl Guard {
    /// Create a guard from an infallible predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&GuardArgs<'_>) -> bool + 'static,
    {
        Guard::Inline(Rc::new(move |args| Ok(predicate(args))))
    }

    /// Create a guard whose evaluation may fail. A failure aborts the whole
    /// transition attempt.
    pub fn fallible<F>(predicate: F) -> Self
    where
        F: Fn(&GuardArgs<'_>) -> Result<bool, ActorError> + 'static,
    {
        Guard::Inline(Rc::new(predicate))
    }

    /// Reference a guard from the implementation table.
    pub fn named(name: impl Into<String>) -> Self {
        Guard::Named {
            name: name.into(),
            params: Value::Null,
        }
    }

    /// Reference a guard from the implementation table with parameters.
    pub fn named_with(name: impl Into<String>, params: Value) -> Self {
        Guard::Named {
            name: name.into(),
            params,
        }
    }

    pub fn not(guard: Guard) -> Self {
        Guard::Not(Box::new(guard))
    }

    pub fn and(guards: Vec<Guard>) -> Self {
        Guard::And(guards)
    }

    pub fn or(guards: Vec<Guard>) -> Self {
        Guard::Or(guards)
    }

    pub fn state_in(state: impl Into<String>) -> Self {
        Guard::StateIn(state.into())
    }

    /// Evaluate the guard.
    pub fn check(&self, args: &GuardArgs<'_>, scope: &dyn GuardScope) -> Result<bool, ActorError> {
        match self {
            Guard::Inline(predicate) => predicate(args),
            Guard::Named { name, params } => {
                let guard = scope
                    .lookup_guard(name)
                    .ok_or_else(|| ActorError::NotImplemented {
                        kind: "guard",
                        name: name.clone(),
                    })?;
                let named_args = GuardArgs {
                    context: args.context,
                    event: args.event,
                    params,
                };
                guard.check(&named_args, scope)
            }
            Guard::Not(inner) => Ok(!inner.check(args, scope)?),
            Guard::And(guards) => {
                for guard in guards {
                    if !guard.check(args, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Or(guards) => {
                for guard in guards {
                    if guard.check(args, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::StateIn(state) => Ok(scope.is_in(state)),
        }
    }

    /// Human readable description, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Guard::Named { name, .. } => name.clone(),
            Guard::Inline(_) => "inline".to_string(),
            Guard::Not(inner) => format!("!{}", inner.describe()),
            Guard::And(guards) => format!(
                "({})",
                guards.iter().map(Guard::describe).collect::<Vec<_>>().join(" && ")
            ),
            Guard::Or(guards) => format!(
                "({})",
                guards.iter().map(Guard::describe).collect::<Vec<_>>().join(" || ")
            ),
            Guard::StateIn(state) => format!("stateIn({state})"),
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({})", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestScope {
        guards: HashMap<String, Guard>,
        active: Vec<String>,
    }

    impl GuardScope for TestScope {
        fn lookup_guard(&self, name: &str) -> Option<&Guard> {
            self.guards.get(name)
        }

        fn is_in(&self, state: &str) -> bool {
            self.active.iter().any(|s| s == state)
        }
    }

    fn scope() -> TestScope {
        let mut guards = HashMap::new();
        guards.insert(
            "isPositive".to_string(),
            Guard::new(|args| args.context.get("n").and_then(Value::as_f64).unwrap_or(0.0) > 0.0),
        );
        guards.insert(
            "atLeast".to_string(),
            Guard::new(|args| {
                let n = args.context.get("n").and_then(Value::as_f64).unwrap_or(0.0);
                let min = args.params.get("min").and_then(Value::as_f64).unwrap_or(0.0);
                n >= min
            }),
        );
        TestScope {
            guards,
            active: vec!["#m.on".to_string()],
        }
    }

    fn check(guard: &Guard, n: i64) -> Result<bool, ActorError> {
        let context = Value::object().with("n", n);
        let event = Event::new("E");
        let params = Value::Null;
        guard.check(
            &GuardArgs {
                context: &context,
                event: &event,
                params: &params,
            },
            &scope(),
        )
    }

    #[test]
    fn inline_guard_uses_context() {
        let guard = Guard::new(|args| args.context.get("n").and_then(Value::as_i64) == Some(3));
        assert!(check(&guard, 3).unwrap());
        assert!(!check(&guard, 4).unwrap());
    }

    #[test]
    fn named_guard_resolves_through_scope() {
        assert!(check(&Guard::named("isPositive"), 1).unwrap());
        assert!(!check(&Guard::named("isPositive"), -1).unwrap());
    }

    #[test]
    fn named_guard_receives_params() {
        let guard = Guard::named_with("atLeast", Value::object().with("min", 5));
        assert!(check(&guard, 5).unwrap());
        assert!(!check(&guard, 4).unwrap());
    }

    #[test]
    fn missing_named_guard_is_an_error() {
        let err = check(&Guard::named("nope"), 1).unwrap_err();
        assert_eq!(
            err,
            ActorError::NotImplemented {
                kind: "guard",
                name: "nope".into()
            }
        );
    }

    #[test]
    fn combinators_compose() {
        let positive = Guard::named("isPositive");
        let big = Guard::new(|args| args.context.get("n").and_then(Value::as_i64).unwrap_or(0) > 10);

        let both = Guard::and(vec![positive.clone(), big.clone()]);
        let either = Guard::or(vec![positive.clone(), big]);

        assert!(!check(&both, 5).unwrap());
        assert!(check(&both, 11).unwrap());
        assert!(check(&either, 5).unwrap());
        assert!(check(&Guard::not(positive), -5).unwrap());
    }

    #[test]
    fn failing_guard_propagates_error() {
        let guard = Guard::fallible(|_| Err(ActorError::custom("bad guard")));
        assert!(check(&Guard::or(vec![guard]), 1).is_err());
    }

    #[test]
    fn state_in_checks_scope() {
        assert!(check(&Guard::state_in("#m.on"), 0).unwrap());
        assert!(!check(&Guard::state_in("#m.off"), 0).unwrap());
    }

    #[test]
    fn guard_is_deterministic() {
        let guard = Guard::named("isPositive");
        assert_eq!(check(&guard, 2).unwrap(), check(&guard, 2).unwrap());
    }

    #[test]
    fn describe_renders_structure() {
        let guard = Guard::and(vec![Guard::named("a"), Guard::not(Guard::named("b"))]);
        assert_eq!(guard.describe(), "(a && !b)");
    }
}
