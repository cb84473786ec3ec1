//! Persisting and restoring running actors.

use statecraft::actor::{create_actor, from_transition, ActorError, ActorOptions, Logic, SpawnOptions};
use statecraft::builder::{MachineConfig, StateConfig, TransitionConfig};
use statecraft::checkpoint::{from_json_str, to_json_string, PersistError, PersistedMachineSnapshot};
use statecraft::core::Value;
use statecraft::effects::{Action, SpawnAction};
use statecraft::machine::{HistoryKind, Implementations, StateMachine};

fn ticker() -> Logic {
    from_transition(
        |state, event, _scope| {
            let ticks = state.get("ticks").and_then(Value::as_i64).unwrap_or(0);
            Ok(match event.event_type() {
                "INC" => state.clone().with("ticks", ticks + 1),
                _ => state.clone(),
            })
        },
        Value::object().with("ticks", 0),
    )
}

fn ticks(actor: &statecraft::actor::ActorRef) -> Option<i64> {
    actor
        .snapshot()
        .context()
        .and_then(|context| context.get("ticks"))
        .and_then(Value::as_i64)
}

fn supervisor() -> StateMachine {
    MachineConfig::new("supervisor")
        .context_fn(|args| {
            let worker = args.spawn("ticker", SpawnOptions::new().id("worker"))?;
            Ok(Value::object().with("worker", worker).with("bumps", 0))
        })
        .initial("running")
        .state(
            "running",
            StateConfig::new().on(
                "BUMP",
                TransitionConfig::targetless()
                    .action(Action::send_to("worker", "INC"))
                    .action(Action::assign(|args| {
                        let bumps = args.context.get("bumps").and_then(Value::as_i64).unwrap_or(0);
                        Ok(Value::object().with("bumps", bumps + 1))
                    })),
            ),
        )
        .build(Implementations::new().with_actor("ticker", ticker()))
        .unwrap()
}

#[test]
fn restored_actor_continues_where_it_left_off() {
    let machine = supervisor();
    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();
    actor.send("BUMP");
    actor.send("BUMP");

    let persisted = actor.persisted_snapshot().unwrap();
    let text = to_json_string(&persisted).unwrap();
    let restored = create_actor(
        machine.logic(),
        ActorOptions::new().snapshot(from_json_str(&text).unwrap()),
    );
    restored.start();

    let original = actor.machine_snapshot().unwrap();
    let snapshot = restored.machine_snapshot().unwrap();
    assert_eq!(snapshot.value(), original.value());
    assert_eq!(snapshot.status(), original.status());
    assert_eq!(snapshot.context().get("bumps").and_then(Value::as_i64), Some(2));

    let worker = snapshot.children().get("worker").cloned().unwrap();
    assert_eq!(ticks(&worker), Some(2));
    assert_eq!(snapshot.context().get("worker").and_then(Value::as_actor), Some(&worker));

    restored.send("BUMP");
    assert_eq!(ticks(&worker), Some(3));
}

#[test]
fn actor_references_persist_as_placeholders() {
    let machine = supervisor();
    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();

    let persisted = PersistedMachineSnapshot::from_json(&actor.persisted_snapshot().unwrap()).unwrap();
    assert_eq!(
        persisted.context.get("worker"),
        Some(&statecraft::checkpoint::actor_placeholder("worker"))
    );
    let child = persisted.children.get("worker").unwrap();
    assert_eq!(child.src, "ticker");
    assert_eq!(child.snapshot.get("context").and_then(|c| c.get("ticks")), Some(&serde_json::json!(0)));
}

#[test]
fn history_survives_a_round_trip() {
    let machine = MachineConfig::new("player")
        .initial("off")
        .state("off", StateConfig::new().on("POWER", "on.hist"))
        .state(
            "on",
            StateConfig::new()
                .on("POWER", "off")
                .state(
                    "a",
                    StateConfig::new()
                        .state("a1", StateConfig::new().on("NEXT", "a2"))
                        .state("a2", StateConfig::new()),
                )
                .state("hist", StateConfig::new().history(HistoryKind::Deep)),
        )
        .build(Implementations::new())
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();
    for event in ["POWER", "NEXT", "POWER"] {
        actor.send(event);
    }
    assert!(actor.machine_snapshot().unwrap().matches("off"));

    let restored = create_actor(
        machine.logic(),
        ActorOptions::new().snapshot(actor.persisted_snapshot().unwrap()),
    );
    restored.start();
    restored.send("POWER");
    assert!(restored.machine_snapshot().unwrap().matches("on.a.a2"));
}

#[test]
fn inline_children_cannot_be_persisted() {
    let machine = MachineConfig::new("m")
        .initial("busy")
        .state(
            "busy",
            StateConfig::new().entry(Action::spawn_child(SpawnAction::new(ticker()).id("inline"))),
        )
        .build(Implementations::new())
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();

    assert_eq!(
        actor.persisted_snapshot(),
        Err(PersistError::InlineActor { id: "inline".into() })
    );
}

#[test]
fn unknown_states_fail_the_restore() {
    let machine = supervisor();
    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();

    let mut persisted = actor.persisted_snapshot().unwrap();
    persisted["value"] = serde_json::json!("nowhere");
    let restored = create_actor(machine.logic(), ActorOptions::new().snapshot(persisted));

    assert!(matches!(
        restored.snapshot().error(),
        Some(ActorError::Persist(PersistError::UnknownState { .. }))
    ));
}

#[test]
fn unknown_child_sources_fail_the_restore() {
    let machine = supervisor();
    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();

    let mut persisted = actor.persisted_snapshot().unwrap();
    persisted["children"]["worker"]["src"] = serde_json::json!("vanished");
    let restored = create_actor(machine.logic(), ActorOptions::new().snapshot(persisted));

    assert_eq!(
        restored.snapshot().error(),
        Some(&ActorError::Persist(PersistError::UnknownSource {
            id: "worker".into(),
            src: "vanished".into(),
        }))
    );
}

fn relay() -> StateMachine {
    MachineConfig::new("relay")
        .context_fn(|args| {
            let leaf = args.spawn("ticker", SpawnOptions::new().id("leaf"))?;
            Ok(Value::object().with("leaf", leaf))
        })
        .initial("forwarding")
        .state(
            "forwarding",
            StateConfig::new().on("INC", TransitionConfig::targetless().action(Action::send_to("leaf", "INC"))),
        )
        .build(Implementations::new().with_actor("ticker", ticker()))
        .unwrap()
}

fn nested_root(middle: StateMachine) -> StateMachine {
    MachineConfig::new("root")
        .context_fn(|args| {
            let mid = args.spawn("relay", SpawnOptions::new().id("mid"))?;
            Ok(Value::object().with("mid", mid))
        })
        .initial("running")
        .state(
            "running",
            StateConfig::new().on("BUMP", TransitionConfig::targetless().action(Action::send_to("mid", "INC"))),
        )
        .build(Implementations::new().with_actor("relay", middle.logic()))
        .unwrap()
}

#[test]
fn nested_actor_references_rebind_at_every_level() {
    let machine = nested_root(relay());
    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();
    actor.send("BUMP");

    let persisted = actor.persisted_snapshot().unwrap();
    let mid_json = &persisted["children"]["mid"];
    assert_eq!(mid_json["src"], serde_json::json!("relay"));
    assert_eq!(
        mid_json["snapshot"]["context"]["leaf"],
        statecraft::checkpoint::actor_placeholder("leaf")
    );

    let restored = create_actor(machine.logic(), ActorOptions::new().snapshot(persisted));
    restored.start();

    let root = restored.machine_snapshot().unwrap();
    let mid = root.children().get("mid").cloned().unwrap();
    assert_eq!(root.context().get("mid").and_then(Value::as_actor), Some(&mid));

    let middle = mid.machine_snapshot().unwrap();
    let leaf = middle.children().get("leaf").cloned().unwrap();
    assert_eq!(middle.context().get("leaf").and_then(Value::as_actor), Some(&leaf));
    assert_eq!(ticks(&leaf), Some(1));

    restored.send("BUMP");
    assert_eq!(ticks(&leaf), Some(2));
}

#[test]
fn inline_grandchildren_fail_the_root_persistence() {
    let middle = MachineConfig::new("relay")
        .initial("busy")
        .state(
            "busy",
            StateConfig::new().entry(Action::spawn_child(SpawnAction::new(ticker()).id("inline"))),
        )
        .build(Implementations::new())
        .unwrap();
    let machine = nested_root(middle);

    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();

    assert!(actor.machine_snapshot().unwrap().children().contains_key("mid"));
    assert_eq!(
        actor.persisted_snapshot(),
        Err(PersistError::InlineActor { id: "inline".into() })
    );
}
