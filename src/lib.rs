//! Statecraft: hierarchical statecharts with a single-threaded actor runtime
//!
//! A machine is described once with the [`builder`] API (or JSON), compiled
//! into an immutable [`StateMachine`], and then either stepped purely with
//! [`StateMachine::next_state`] or run inside an actor created with
//! [`create_actor`].
//!
//! # Core Concepts
//!
//! - **State tree**: compound, parallel, final and history nodes, compiled
//!   once and indexed by document order
//! - **Snapshots**: immutable values; an event that changes nothing returns
//!   the same `Rc`
//! - **Actions**: data describing effects, resolved during a transition and
//!   executed only after the new snapshot is committed
//! - **Actors**: mailboxes processed one event at a time, parents owning
//!   their children, all sharing one [`system::ActorSystem`]
//!
//! # Example
//!
//! ```rust
//! use statecraft::{create_actor, ActorOptions, Implementations, MachineConfig, StateConfig};
//!
//! let machine = MachineConfig::new("light")
//!     .initial("red")
//!     .state("red", StateConfig::new().on("TIMER", "green"))
//!     .state("green", StateConfig::new().on("TIMER", "yellow"))
//!     .state("yellow", StateConfig::new().on("TIMER", "red"))
//!     .build(Implementations::new())
//!     .unwrap();
//!
//! let red = machine.initial_state().unwrap();
//! let green = machine.next_state(&red, "TIMER").unwrap();
//! assert!(green.matches("green"));
//!
//! let actor = create_actor(machine.logic(), ActorOptions::default());
//! actor.start();
//! actor.send("TIMER");
//! actor.send("TIMER");
//! assert!(actor.machine_snapshot().unwrap().matches("yellow"));
//! ```

pub mod actor;
pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod effects;
pub mod machine;
pub mod system;

// Re-export commonly used types
pub use actor::{
    create_actor, from_transition, ActorError, ActorLogic, ActorOptions, ActorRef, ActorScope,
    SnapshotStatus, SpawnOptions,
};
pub use builder::{BuildError, InvokeConfig, MachineConfig, StateConfig, TransitionConfig};
pub use checkpoint::PersistError;
pub use core::{Event, Guard, HistoryValue, StateValue, Value};
pub use effects::Action;
pub use machine::{HistoryKind, Implementations, MachineSnapshot, StateMachine};
pub use system::{ActorSystem, SimulatedClock};
