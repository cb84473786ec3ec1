//! Actions and their resolution.
//!
//! Actions are a closed variant family. Built-ins (`assign`, `raise`,
//! `send_to`, `spawn_child`, `stop_child`, `cancel`, `emit`, `log`,
//! `enqueue_actions`) carry their own resolve logic; `Custom` wraps an
//! opaque closure and `Named` defers to the machine's implementations.

mod action;
mod resolve;

pub use action::{
    Action, ActionArgs, ActionFn, AssignArgs, AssignFn, Delay, Enqueue, EnqueueFn, Expr,
    LogicSource, SpawnAction, Target,
};
pub(crate) use resolve::{Pass, Resolver};
