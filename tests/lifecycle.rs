mod common;

use rvsynth::{
    Event, ExecutionError, Pattern, Property, RvError, Scope, State, TimeBound, ValidationError,
    Verdict,
};

use common::{at, data, monitor, positive, within_ms};

fn scopes() -> Vec<Scope> {
    vec![
        Scope::Global,
        Scope::After(Event::any("/p")),
        Scope::Until(Event::any("/q")),
        Scope::AfterUntil(Event::any("/p"), Event::any("/q")),
    ]
}

fn patterns(bound: TimeBound) -> Vec<Pattern> {
    vec![
        Pattern::Absence {
            behavior: positive("/b"),
            bound,
        },
        Pattern::Existence {
            behavior: positive("/b"),
            bound,
        },
        Pattern::Requirement {
            behavior: positive("/b"),
            trigger: Event::any("/a").alias("a"),
            bound,
        },
        Pattern::Response {
            trigger: Event::any("/a").alias("a"),
            behavior: positive("/b"),
            bound,
        },
    ]
}

fn all_properties() -> Vec<Property> {
    let mut out = Vec::new();
    for bound in [TimeBound::Unbounded, within_ms(100)] {
        for scope in scopes() {
            for pattern in patterns(bound) {
                out.push(Property::new(scope.clone(), pattern));
            }
        }
    }
    out
}

#[test]
fn every_combination_compiles() {
    assert_eq!(all_properties().len(), 32);
    for property in all_properties() {
        let m = monitor(&property);
        assert!(m.spec().states.contains(&m.spec().initial));
        assert!(!m.spec().states.contains(&State::Off));
    }
}

#[test]
fn launch_twice_fails_for_every_combination() {
    for property in all_properties() {
        let m = monitor(&property);
        m.launch(at(0)).unwrap();
        let err = m.launch(at(1)).unwrap_err();
        assert!(err.is_usage(), "{err}");
        assert!(!err.is_retryable());
    }
}

#[test]
fn shutdown_before_launch_fails_for_every_combination() {
    for property in all_properties() {
        let m = monitor(&property);
        assert_eq!(
            m.shutdown(at(0)).unwrap_err(),
            RvError::Execution(ExecutionError::NotActive)
        );
    }
}

#[test]
fn shutdown_keeps_verdict() {
    let property = Property::new(
        Scope::Global,
        Pattern::Absence {
            behavior: positive("/b"),
            bound: TimeBound::Unbounded,
        },
    );

    let m = monitor(&property);
    m.launch(at(0)).unwrap();
    m.on_message("/b", &data(1), at(10)).unwrap();
    let before = m.verdict().unwrap();
    m.shutdown(at(20)).unwrap();
    assert_eq!(m.verdict().unwrap(), before);
    assert_eq!(before, Verdict::Violated);
    assert_eq!(m.state().unwrap(), State::Off);
    assert_eq!(m.witness().unwrap().len(), 1);

    let snap = m.snapshot().unwrap();
    assert_eq!(snap.launch_time, Some(at(0)));
    assert_eq!(snap.shutdown_time, Some(at(20)));
    assert_eq!(snap.last_transition_time, Some(at(10)));

    // A second shutdown is a usage error.
    assert!(m.shutdown(at(30)).unwrap_err().is_usage());
}

#[test]
fn unknown_verdict_survives_shutdown() {
    let property = Property::new(
        Scope::Global,
        Pattern::Existence {
            behavior: positive("/b"),
            bound: TimeBound::Unbounded,
        },
    );
    let m = monitor(&property);
    m.launch(at(0)).unwrap();
    m.shutdown(at(5)).unwrap();
    assert_eq!(m.verdict().unwrap(), Verdict::Unknown);
    assert!(!m.on_message("/b", &data(1), at(6)).unwrap());
}

#[test]
fn prevention_fails_to_compile() {
    let property = Property::new(
        Scope::Global,
        Pattern::Prevention {
            trigger: Event::any("/a"),
            behavior: Event::any("/b"),
            bound: TimeBound::Unbounded,
        },
    );
    let err = rvsynth::compile(&property).unwrap_err();
    assert!(matches!(
        err,
        RvError::Validation(ValidationError::UnsupportedPattern { .. })
    ));
}

#[test]
fn unbound_alias_fails_to_compile() {
    use rvsynth::predicate::{CmpOp, Compare};

    // The trigger of a precedence property cannot read the behavior's alias.
    let property = Property::new(
        Scope::Global,
        Pattern::Requirement {
            behavior: Event::any("/b").alias("b"),
            trigger: Event::on("/a", Compare::reference("x", CmpOp::Eq, "b", "x")),
            bound: TimeBound::Unbounded,
        },
    );
    let err = rvsynth::compile(&property).unwrap_err();
    assert!(err.is_validation(), "{err}");
}
