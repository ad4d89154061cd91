mod common;

use rvsynth::predicate::{CmpOp, Compare};
use rvsynth::{Event, Message, Pattern, Property, Scope, State, TimeBound, Verdict};

use common::{at, data, init_tracing, monitor, positive, within_ms, x, Log};

fn between_p_and_q(pattern: Pattern) -> Property {
    Property::new(
        Scope::AfterUntil(Event::any("/p").alias("p"), Event::any("/q")),
        pattern,
    )
}

#[test]
fn reentrant_scope_resets_between_episodes() {
    let mut m = monitor(&between_p_and_q(Pattern::Absence {
        behavior: positive("/b"),
        bound: TimeBound::Unbounded,
    }));
    let log = Log::default();
    log.attach(&mut m);

    m.launch(at(0)).unwrap();
    assert_eq!(m.state().unwrap(), State::Inactive);
    assert!(log.entries().is_empty());

    assert!(m.on_message("/p", &data(0), at(10)).unwrap());
    assert_eq!(m.witness().unwrap().len(), 1);
    assert!(!m.on_message("/b", &data(0), at(20)).unwrap());
    assert!(m.on_message("/q", &data(0), at(30)).unwrap());

    let snap = m.snapshot().unwrap();
    assert_eq!(snap.state, State::Inactive);
    assert!(snap.witness.is_empty());
    assert!(snap.pool.is_empty());
    assert_eq!(snap.verdict, Verdict::Unknown);
    assert_eq!(snap.episode_start, None);

    assert!(m.on_message("/p", &data(0), at(40)).unwrap());
    let witness = m.witness().unwrap();
    assert_eq!(witness.len(), 1);
    assert_eq!(witness[0].timestamp, at(40));

    assert_eq!(log.entries(), vec!["enter@10", "exit@30", "enter@40"]);
}

#[test]
fn messages_outside_the_scope_are_ignored() {
    let m = monitor(&between_p_and_q(Pattern::Absence {
        behavior: positive("/b"),
        bound: TimeBound::Unbounded,
    }));
    m.launch(at(0)).unwrap();
    assert!(!m.on_message("/b", &data(1), at(5)).unwrap());
    assert!(!m.on_message("/q", &data(1), at(6)).unwrap());
    m.on_message("/p", &data(0), at(10)).unwrap();
    m.on_message("/q", &data(0), at(20)).unwrap();
    assert!(!m.on_message("/b", &data(1), at(25)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Unknown);
}

#[test]
fn safe_window_ignores_behavior_until_the_scope_closes() {
    init_tracing();
    let mut m = monitor(&between_p_and_q(Pattern::Absence {
        behavior: positive("/b"),
        bound: within_ms(100),
    }));
    let log = Log::default();
    log.attach(&mut m);

    m.launch(at(0)).unwrap();
    m.on_message("/p", &data(0), at(0)).unwrap();
    m.on_timer(at(200)).unwrap();
    assert_eq!(m.state().unwrap(), State::Safe);
    assert_eq!(m.verdict().unwrap(), Verdict::Unknown);

    assert!(!m.on_message("/b", &data(1), at(250)).unwrap());
    assert!(m.on_message("/q", &data(0), at(300)).unwrap());
    assert_eq!(m.state().unwrap(), State::Inactive);

    m.on_message("/p", &data(0), at(400)).unwrap();
    assert!(m.on_message("/b", &data(1), at(450)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Violated);

    let witness = m.witness().unwrap();
    assert_eq!(witness.len(), 2);
    assert_eq!(witness[0].timestamp, at(400));
    assert_eq!(witness[1].timestamp, at(450));
    assert_eq!(
        log.entries(),
        vec!["enter@0", "exit@300", "enter@400", "violation@450/2"]
    );
}

#[test]
fn reentrant_existence_must_hold_in_every_episode() {
    let m = monitor(&between_p_and_q(Pattern::Existence {
        behavior: positive("/b"),
        bound: TimeBound::Unbounded,
    }));
    m.launch(at(0)).unwrap();

    m.on_message("/p", &data(0), at(10)).unwrap();
    m.on_message("/b", &data(1), at(20)).unwrap();
    assert_eq!(m.state().unwrap(), State::Safe);
    m.on_message("/q", &data(0), at(30)).unwrap();
    assert_eq!(m.verdict().unwrap(), Verdict::Unknown);

    m.on_message("/p", &data(0), at(40)).unwrap();
    m.on_message("/q", &data(0), at(50)).unwrap();
    assert_eq!(m.verdict().unwrap(), Verdict::Violated);
    let witness = m.witness().unwrap();
    assert_eq!(witness.len(), 2);
    assert_eq!(witness[0].topic, "/p");
    assert_eq!(witness[1].topic, "/q");
}

#[test]
fn terminator_wins_over_behavior_on_the_same_message() {
    let property = Property::new(
        Scope::Until(Event::on("/b", Compare::constant("stop", CmpOp::Eq, true))),
        Pattern::Absence {
            behavior: Event::any("/b"),
            bound: TimeBound::Unbounded,
        },
    );
    let m = monitor(&property);
    m.launch(at(0)).unwrap();
    assert!(m
        .on_message("/b", &Message::new().with("stop", true), at(10))
        .unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Satisfied);
}

#[test]
fn behavior_reads_the_activator_binding() {
    let property = Property::new(
        Scope::After(Event::any("/p").alias("p")),
        Pattern::Absence {
            behavior: Event::on("/b", Compare::reference("x", CmpOp::Eq, "p", "x")),
            bound: TimeBound::Unbounded,
        },
    );
    let m = monitor(&property);
    m.launch(at(0)).unwrap();
    m.on_message("/p", &x(3), at(10)).unwrap();
    assert!(!m.on_message("/b", &x(2), at(20)).unwrap());
    assert!(m.on_message("/b", &x(3), at(30)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Violated);
}

#[test]
fn after_scope_opens_only_once() {
    let m = monitor(&Property::new(
        Scope::After(Event::any("/p")),
        Pattern::Absence {
            behavior: positive("/b"),
            bound: TimeBound::Unbounded,
        },
    ));
    m.launch(at(0)).unwrap();
    assert!(m.on_message("/p", &data(0), at(10)).unwrap());
    assert!(!m.on_message("/p", &data(0), at(20)).unwrap());
    assert_eq!(m.witness().unwrap().len(), 1);
}

#[test]
fn disjunctive_behavior_matches_on_any_topic() {
    let property = Property::new(
        Scope::Global,
        Pattern::Existence {
            behavior: positive("/b1").or("/b2", Compare::constant("data", CmpOp::Lt, 0)),
            bound: TimeBound::Unbounded,
        },
    );
    let m = monitor(&property);
    m.launch(at(0)).unwrap();
    assert!(!m.on_message("/b2", &data(1), at(10)).unwrap());
    assert!(m.on_message("/b2", &data(-1), at(20)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Satisfied);
    assert_eq!(m.witness().unwrap()[0].topic, "/b2");
}

#[test]
fn until_close_fires_exit_before_the_verdict() {
    let mut m = monitor(&Property::new(
        Scope::Until(Event::any("/q")),
        Pattern::Absence {
            behavior: positive("/b"),
            bound: TimeBound::Unbounded,
        },
    ));
    let log = Log::default();
    log.attach(&mut m);

    m.launch(at(0)).unwrap();
    assert!(m.on_message("/q", &data(0), at(10)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Satisfied);
    assert_eq!(m.snapshot().unwrap().episode_start, None);
    assert_eq!(log.entries(), vec!["enter@0", "exit@10", "success@10/1"]);
}

#[test]
fn violating_episode_close_still_exits_the_scope() {
    let mut m = monitor(&between_p_and_q(Pattern::Existence {
        behavior: positive("/b"),
        bound: TimeBound::Unbounded,
    }));
    let log = Log::default();
    log.attach(&mut m);

    m.launch(at(0)).unwrap();
    m.on_message("/p", &data(0), at(5)).unwrap();
    assert!(m.on_message("/q", &data(0), at(10)).unwrap());
    assert_eq!(m.verdict().unwrap(), Verdict::Violated);
    assert_eq!(log.entries(), vec!["enter@5", "exit@10", "violation@10/2"]);
}
