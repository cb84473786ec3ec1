//! End-to-end behaviour of compiled machines: selection, ordering,
//! hierarchy, history, eventless and delayed transitions, completion.

use statecraft::actor::{create_actor, ActorError, ActorOptions, SnapshotStatus};
use statecraft::builder::{MachineConfig, StateConfig, TransitionConfig};
use statecraft::core::{Guard, Value};
use statecraft::effects::Action;
use statecraft::machine::{HistoryKind, Implementations, MachineSnapshot, StateMachine};
use statecraft::system::SimulatedClock;
use std::cell::RefCell;
use std::rc::Rc;

fn traffic_light() -> StateMachine {
    MachineConfig::new("light")
        .initial("red")
        .state("red", StateConfig::new().on("TIMER", "green"))
        .state("green", StateConfig::new().on("TIMER", "yellow"))
        .state("yellow", StateConfig::new().on("TIMER", "red"))
        .build(Implementations::new())
        .unwrap()
}

fn count(context: &Value) -> i64 {
    context.get("count").and_then(Value::as_i64).unwrap_or(0)
}

fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Action) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let record = move |label: &str| {
        let sink = sink.clone();
        let label = label.to_string();
        Action::custom(label.clone(), move |_| {
            sink.borrow_mut().push(label.clone());
            Ok(())
        })
    };
    (log, record)
}

#[test]
fn traffic_light_cycles_on_timer() {
    let machine = traffic_light();
    let red = machine.initial_state().unwrap();
    assert!(red.matches("red"));

    let green = machine.next_state(&red, "TIMER").unwrap();
    assert!(green.matches("green"));

    let yellow = machine.next_state(&green, "TIMER").unwrap();
    assert!(yellow.matches("yellow"));

    let red_again = machine.next_state(&yellow, "TIMER").unwrap();
    assert!(red_again.matches("red"));
}

#[test]
fn unrelated_events_return_the_same_snapshot() {
    let machine = traffic_light();
    let mut snapshot = machine.initial_state().unwrap();
    for _ in 0..3 {
        let ignored = machine.next_state(&snapshot, "FOO").unwrap();
        assert!(Rc::ptr_eq(&snapshot, &ignored));
        snapshot = machine.next_state(&snapshot, "TIMER").unwrap();
    }
}

#[test]
fn guarded_counter_stops_at_two() {
    let machine = MachineConfig::new("counter")
        .context(Value::object().with("count", 0))
        .initial("active")
        .state(
            "active",
            StateConfig::new().on(
                "INC",
                TransitionConfig::targetless()
                    .guard(Guard::new(|args| count(args.context) < 2))
                    .action(Action::assign(|args| {
                        Ok(Value::object().with("count", count(args.context) + 1))
                    })),
            ),
        )
        .build(Implementations::new())
        .unwrap();

    let initial = machine.initial_state().unwrap();
    let one = machine.next_state(&initial, "INC").unwrap();
    let two = machine.next_state(&one, "INC").unwrap();
    let blocked = machine.next_state(&two, "INC").unwrap();

    assert_eq!(count(one.context()), 1);
    assert_eq!(count(blocked.context()), 2);
    assert!(Rc::ptr_eq(&two, &blocked));
}

#[test]
fn named_guards_and_actions_resolve_through_implementations() {
    let machine = MachineConfig::new("counter")
        .context(Value::object().with("count", 0))
        .initial("active")
        .state(
            "active",
            StateConfig::new().on(
                "ADD",
                TransitionConfig::targetless()
                    .guard(Guard::named_with("below", Value::object().with("limit", 5)))
                    .action(Action::named_with("add", Value::object().with("by", 3))),
            ),
        )
        .build(
            Implementations::new()
                .with_guard(
                    "below",
                    Guard::new(|args| {
                        count(args.context) < args.params.get("limit").and_then(Value::as_i64).unwrap_or(0)
                    }),
                )
                .with_action(
                    "add",
                    Action::assign(|args| {
                        let by = args.params.get("by").and_then(Value::as_i64).unwrap_or(1);
                        Ok(Value::object().with("count", count(args.context) + by))
                    }),
                ),
        )
        .unwrap();

    let initial = machine.initial_state().unwrap();
    let three = machine.next_state(&initial, "ADD").unwrap();
    let six = machine.next_state(&three, "ADD").unwrap();
    let blocked = machine.next_state(&six, "ADD").unwrap();

    assert_eq!(count(three.context()), 3);
    assert_eq!(count(six.context()), 6);
    assert!(Rc::ptr_eq(&six, &blocked));
}

#[test]
fn failing_guard_aborts_the_transition() {
    let machine = MachineConfig::new("m")
        .initial("a")
        .state(
            "a",
            StateConfig::new().on(
                "GO",
                TransitionConfig::to("b").guard(Guard::fallible(|_| Err(ActorError::custom("no context")))),
            ),
        )
        .state("b", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let initial = machine.initial_state().unwrap();
    let err = machine.next_state(&initial, "GO").unwrap_err();
    match err {
        ActorError::Guard { event, state, message, .. } => {
            assert_eq!(event, "GO");
            assert_eq!(state, "m.a");
            assert_eq!(message, "no context");
        }
        other => panic!("expected a guard error, got {other:?}"),
    }
    assert!(!initial.can("GO"));
}

#[test]
fn exits_run_before_entries_in_document_order() {
    let (log, record) = recorder();
    let machine = MachineConfig::new("m")
        .initial("p")
        .state(
            "p",
            StateConfig::new()
                .initial("a")
                .state(
                    "a",
                    StateConfig::new()
                        .entry(record("enter a"))
                        .exit(record("exit a"))
                        .on("GO", TransitionConfig::to("b").action(record("transition")))
                        .state("a1", StateConfig::new().entry(record("enter a1")).exit(record("exit a1"))),
                )
                .state(
                    "b",
                    StateConfig::new()
                        .entry(record("enter b"))
                        .exit(record("exit b"))
                        .state("b1", StateConfig::new().entry(record("enter b1"))),
                ),
        )
        .build(Implementations::new())
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();
    assert_eq!(*log.borrow(), vec!["enter a", "enter a1"]);

    log.borrow_mut().clear();
    actor.send("GO");
    assert_eq!(
        *log.borrow(),
        vec!["exit a1", "exit a", "transition", "enter b", "enter b1"]
    );
    assert!(actor.machine_snapshot().unwrap().matches("p.b.b1"));
}

#[test]
fn reentering_transitions_exit_and_enter_the_source() {
    let (log, record) = recorder();
    let machine = MachineConfig::new("m")
        .initial("a")
        .state(
            "a",
            StateConfig::new()
                .entry(record("enter a"))
                .exit(record("exit a"))
                .on("AGAIN", TransitionConfig::to("a").reenter(true))
                .on("STAY", TransitionConfig::targetless().action(record("stay"))),
        )
        .build(Implementations::new())
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::default());
    actor.start();
    log.borrow_mut().clear();

    actor.send("STAY");
    actor.send("AGAIN");
    assert_eq!(*log.borrow(), vec!["stay", "exit a", "enter a"]);
}

#[test]
fn parallel_state_completes_only_when_every_region_is_final() {
    let region = |event: &str| {
        StateConfig::new()
            .initial("pending")
            .state("pending", StateConfig::new().on(event, "done"))
            .state("done", StateConfig::new().final_state())
    };
    let machine = MachineConfig::new("m")
        .initial("work")
        .state(
            "work",
            StateConfig::new()
                .parallel()
                .state("upload", region("UP_DONE"))
                .state("download", region("DOWN_DONE"))
                .on_done("finished"),
        )
        .state("finished", StateConfig::new().final_state())
        .build(Implementations::new())
        .unwrap();

    let initial = machine.initial_state().unwrap();
    assert!(initial.matches("work.upload.pending"));
    assert!(initial.matches("work.download.pending"));

    let half = machine.next_state(&initial, "UP_DONE").unwrap();
    assert!(half.matches("work.upload.done"));
    assert!(half.matches("work.download.pending"));
    assert_eq!(half.status(), SnapshotStatus::Active);

    let done = machine.next_state(&half, "DOWN_DONE").unwrap();
    assert!(done.matches("finished"));
    assert_eq!(done.status(), SnapshotStatus::Done);
}

#[test]
fn conflicting_region_transitions_keep_the_first_in_document_order() {
    let machine = MachineConfig::new("m")
        .initial("p")
        .state(
            "p",
            StateConfig::new()
                .parallel()
                .state("left", StateConfig::new().state("a", StateConfig::new().on("GO", "#m.out1")))
                .state("right", StateConfig::new().state("b", StateConfig::new().on("GO", "#m.out2"))),
        )
        .state("out1", StateConfig::new())
        .state("out2", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let next = machine.next_state(&machine.initial_state().unwrap(), "GO").unwrap();

    assert!(next.matches("out1"));
    assert!(!next.matches("out2"));
    assert!(!next.matches("p"));
}

#[test]
fn descendant_transition_preempts_its_ancestor() {
    let machine = MachineConfig::new("m")
        .initial("p")
        .state(
            "p",
            StateConfig::new()
                .parallel()
                .on("GO", "out")
                .state("left", StateConfig::new().state("idle", StateConfig::new()))
                .state(
                    "right",
                    StateConfig::new()
                        .state("a1", StateConfig::new().on("GO", "a2"))
                        .state("a2", StateConfig::new()),
                ),
        )
        .state("out", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let next = machine.next_state(&machine.initial_state().unwrap(), "GO").unwrap();

    assert!(next.matches("p.right.a2"));
    assert!(next.matches("p.left.idle"));
    assert!(!next.matches("out"));
}

fn player(kind: HistoryKind) -> StateMachine {
    MachineConfig::new("player")
        .initial("off")
        .state("off", StateConfig::new().on("POWER", "on.hist"))
        .state(
            "on",
            StateConfig::new()
                .initial("a")
                .on("POWER", "off")
                .state(
                    "a",
                    StateConfig::new()
                        .initial("a1")
                        .on("SWITCH", "b")
                        .state("a1", StateConfig::new().on("NEXT", "a2"))
                        .state("a2", StateConfig::new()),
                )
                .state("b", StateConfig::new())
                .state("hist", StateConfig::new().history(kind)),
        )
        .build(Implementations::new())
        .unwrap()
}

fn send_all(machine: &StateMachine, events: &[&str]) -> Rc<MachineSnapshot> {
    let mut snapshot = machine.initial_state().unwrap();
    for event in events {
        snapshot = machine.next_state(&snapshot, *event).unwrap();
    }
    snapshot
}

#[test]
fn history_without_record_falls_back_to_parent_initial() {
    let machine = player(HistoryKind::Shallow);
    let snapshot = send_all(&machine, &["POWER"]);
    assert!(snapshot.matches("on.a.a1"));
}

#[test]
fn shallow_history_restores_the_child_only() {
    let machine = player(HistoryKind::Shallow);
    let snapshot = send_all(&machine, &["POWER", "NEXT", "POWER", "POWER"]);
    assert!(snapshot.matches("on.a.a1"));

    let switched = send_all(&machine, &["POWER", "SWITCH", "POWER", "POWER"]);
    assert!(switched.matches("on.b"));
}

#[test]
fn deep_history_restores_the_leaf_chain() {
    let machine = player(HistoryKind::Deep);
    let snapshot = send_all(&machine, &["POWER", "NEXT", "POWER", "POWER"]);
    assert!(snapshot.matches("on.a.a2"));
    assert_eq!(
        snapshot.history().get("player.on.hist").map(<[String]>::to_vec),
        Some(vec!["player.on.a.a2".to_string()])
    );
}

#[test]
fn eventless_transitions_settle_before_the_step_ends() {
    let machine = MachineConfig::new("m")
        .context(Value::object().with("count", 5))
        .initial("check")
        .state(
            "check",
            StateConfig::new()
                .always(TransitionConfig::to("big").guard(Guard::new(|args| count(args.context) > 3)))
                .always("small"),
        )
        .state("big", StateConfig::new())
        .state("small", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    assert!(machine.initial_state().unwrap().matches("big"));
}

#[test]
fn raised_events_are_processed_in_the_same_step() {
    let machine = MachineConfig::new("m")
        .initial("a")
        .state("a", StateConfig::new().on("GO", TransitionConfig::to("b").action(Action::raise("NEXT"))))
        .state("b", StateConfig::new().on("NEXT", "c"))
        .state("c", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let initial = machine.initial_state().unwrap();
    let settled = machine.next_state(&initial, "GO").unwrap();
    assert!(settled.matches("c"));
}

#[test]
fn wildcard_catches_unmatched_events() {
    let machine = MachineConfig::new("m")
        .initial("idle")
        .state(
            "idle",
            StateConfig::new()
                .on("mouse.*", "tracking")
                .on("*", "confused")
                .on("mouse.click", "clicked"),
        )
        .state("tracking", StateConfig::new())
        .state("confused", StateConfig::new())
        .state("clicked", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let idle = machine.initial_state().unwrap();
    assert!(machine.next_state(&idle, "mouse.click").unwrap().matches("clicked"));
    assert!(machine.next_state(&idle, "mouse.move").unwrap().matches("tracking"));
    assert!(machine.next_state(&idle, "key.down").unwrap().matches("confused"));
}

#[test]
fn delayed_transitions_follow_the_clock() {
    let clock = SimulatedClock::new();
    let machine = MachineConfig::new("m")
        .initial("waiting")
        .state(
            "waiting",
            StateConfig::new().after(1000, "timed_out").on("ANSWER", "answered"),
        )
        .state("timed_out", StateConfig::new())
        .state("answered", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::new().clock(clock.clone()));
    actor.start();
    assert_eq!(clock.pending(), 1);

    clock.increment(999);
    assert!(actor.machine_snapshot().unwrap().matches("waiting"));
    clock.increment(1);
    assert!(actor.machine_snapshot().unwrap().matches("timed_out"));
    assert_eq!(clock.pending(), 0);
}

#[test]
fn leaving_a_state_cancels_its_delays() {
    let clock = SimulatedClock::new();
    let machine = MachineConfig::new("m")
        .initial("waiting")
        .state(
            "waiting",
            StateConfig::new().after("patience", "timed_out").on("ANSWER", "answered"),
        )
        .state("timed_out", StateConfig::new())
        .state("answered", StateConfig::new())
        .build(Implementations::new().with_delay("patience", 500))
        .unwrap();

    let actor = create_actor(machine.logic(), ActorOptions::new().clock(clock.clone()));
    actor.start();
    actor.send("ANSWER");
    assert_eq!(clock.pending(), 0);

    clock.increment(1000);
    assert!(actor.machine_snapshot().unwrap().matches("answered"));
}

#[test]
fn final_output_flows_into_on_done_and_machine_output() {
    let machine = MachineConfig::new("m")
        .initial("job")
        .state(
            "job",
            StateConfig::new()
                .initial("working")
                .state("working", StateConfig::new().on("FINISH", "complete"))
                .state(
                    "complete",
                    StateConfig::new()
                        .final_state()
                        .output(Value::object().with("result", 42)),
                )
                .on_done(TransitionConfig::to("reported").action(Action::assign(|args| {
                    let output = args.event.output().cloned().unwrap_or(Value::Null);
                    Ok(Value::object().with("report", output))
                }))),
        )
        .state("reported", StateConfig::new().final_state())
        .output_fn(|args| Ok(args.context.get("report").cloned().unwrap_or(Value::Null)))
        .build(Implementations::new())
        .unwrap();

    let initial = machine.initial_state().unwrap();
    let done = machine.next_state(&initial, "FINISH").unwrap();

    assert!(done.matches("reported"));
    assert_eq!(done.status(), SnapshotStatus::Done);
    assert_eq!(done.output(), Some(&Value::object().with("result", 42)));
    assert!(!done.can("FINISH"));
}

#[test]
fn tags_and_meta_follow_the_active_configuration() {
    let machine = MachineConfig::new("m")
        .initial("loading")
        .state(
            "loading",
            StateConfig::new()
                .tag("busy")
                .meta(Value::object().with("message", "please wait"))
                .on("LOADED", "ready"),
        )
        .state("ready", StateConfig::new())
        .build(Implementations::new())
        .unwrap();

    let loading = machine.initial_state().unwrap();
    assert!(loading.has_tag("busy"));
    assert_eq!(
        loading.meta().get("m.loading").and_then(|meta| meta.get("message")).and_then(Value::as_str),
        Some("please wait")
    );

    let ready = machine.next_state(&loading, "LOADED").unwrap();
    assert!(!ready.has_tag("busy"));
    assert!(ready.meta().is_empty());
}

#[test]
fn json_configuration_runs_like_the_builder() {
    let machine = MachineConfig::from_json(
        r#"{
            "id": "light",
            "initial": "red",
            "states": {
                "red": { "on": { "TIMER": "green" } },
                "green": { "on": { "TIMER": { "target": "yellow", "guard": "allowed" } } },
                "yellow": {}
            }
        }"#,
    )
    .unwrap()
    .build(Implementations::new().with_guard("allowed", Guard::new(|_| true)))
    .unwrap();

    let red = machine.initial_state().unwrap();
    let green = machine.next_state(&red, "TIMER").unwrap();
    let yellow = machine.next_state(&green, "TIMER").unwrap();
    assert!(yellow.matches("yellow"));
}
