mod common;

use proptest::prelude::*;

use rvsynth::{Event, Pattern, Property, Scope, TimeBound, Verdict};

use common::{at, data, monitor, positive, within_ms};

#[derive(Debug, Clone)]
enum Input {
    Msg { topic: &'static str, value: i64 },
    Tick,
}

fn input() -> impl Strategy<Value = Input> {
    prop_oneof![
        (prop::sample::select(vec!["/a", "/b", "/c"]), -3i64..4)
            .prop_map(|(topic, value)| Input::Msg { topic, value }),
        Just(Input::Tick),
    ]
}

fn ts(i: usize) -> i64 {
    i64::try_from(i).unwrap() * 10 + 10
}

proptest! {
    #[test]
    fn absence_violated_iff_positive_b_seen(inputs in prop::collection::vec(input(), 0..40)) {
        let m = monitor(&Property::new(
            Scope::Global,
            Pattern::Absence { behavior: positive("/b"), bound: TimeBound::Unbounded },
        ));
        m.launch(at(0)).unwrap();

        let mut expected = Verdict::Unknown;
        for (i, inp) in inputs.iter().enumerate() {
            match inp {
                Input::Msg { topic, value } => {
                    let consumed = m.on_message(topic, &data(*value), at(ts(i))).unwrap();
                    let violating = *topic == "/b" && *value > 0 && expected == Verdict::Unknown;
                    prop_assert_eq!(consumed, violating);
                    if violating {
                        expected = Verdict::Violated;
                    }
                }
                Input::Tick => m.on_timer(at(ts(i))).unwrap(),
            }
            prop_assert_eq!(m.verdict().unwrap(), expected);
        }
        let witness_len = usize::from(expected == Verdict::Violated);
        prop_assert_eq!(m.witness().unwrap().len(), witness_len);
    }

    #[test]
    fn terminal_verdicts_never_change(inputs in prop::collection::vec(input(), 0..40)) {
        let m = monitor(&Property::new(
            Scope::Global,
            Pattern::Existence { behavior: positive("/b"), bound: within_ms(150) },
        ));
        m.launch(at(0)).unwrap();

        let mut settled: Option<(Verdict, usize)> = None;
        for (i, inp) in inputs.iter().enumerate() {
            match inp {
                Input::Msg { topic, value } => {
                    m.on_message(topic, &data(*value), at(ts(i))).unwrap();
                }
                Input::Tick => m.on_timer(at(ts(i))).unwrap(),
            }
            let now = (m.verdict().unwrap(), m.witness().unwrap().len());
            match settled {
                Some(prev) => prop_assert_eq!(prev, now),
                None if now.0.is_known() => settled = Some(now),
                None => {}
            }
        }
    }

    #[test]
    fn unreferenced_precedence_follows_first_event(inputs in prop::collection::vec(input(), 0..40)) {
        let m = monitor(&Property::new(
            Scope::Global,
            Pattern::Requirement {
                behavior: Event::any("/b"),
                trigger: Event::any("/a"),
                bound: TimeBound::Unbounded,
            },
        ));
        m.launch(at(0)).unwrap();

        for (i, inp) in inputs.iter().enumerate() {
            match inp {
                Input::Msg { topic, value } => {
                    m.on_message(topic, &data(*value), at(ts(i))).unwrap();
                }
                Input::Tick => m.on_timer(at(ts(i))).unwrap(),
            }
        }

        let first = inputs.iter().find_map(|inp| match inp {
            Input::Msg { topic, .. } if *topic == "/a" || *topic == "/b" => Some(*topic),
            _ => None,
        });
        let expected = match first {
            Some("/a") => Verdict::Satisfied,
            Some(_) => Verdict::Violated,
            None => Verdict::Unknown,
        };
        prop_assert_eq!(m.verdict().unwrap(), expected);
    }

    #[test]
    fn response_pool_never_holds_discharged_triggers(
        inputs in prop::collection::vec((prop::bool::ANY, 0i64..10), 0..40)
    ) {
        use rvsynth::predicate::{CmpOp, Compare};

        let m = monitor(&Property::new(
            Scope::Global,
            Pattern::Response {
                trigger: Event::any("/a").alias("a"),
                behavior: Event::on("/b", Compare::reference("x", CmpOp::Ge, "a", "x")),
                bound: TimeBound::Unbounded,
            },
        ));
        m.launch(at(0)).unwrap();

        let mut outstanding: Vec<i64> = Vec::new();
        for (i, (is_trigger, v)) in inputs.iter().enumerate() {
            let msg = rvsynth::Message::new().with("x", *v);
            if *is_trigger {
                m.on_message("/a", &msg, at(ts(i))).unwrap();
                outstanding.push(*v);
            } else {
                m.on_message("/b", &msg, at(ts(i))).unwrap();
                outstanding.retain(|a| v < a);
            }
            let pooled = common::xs(&m.snapshot().unwrap().pool);
            prop_assert_eq!(&pooled, &outstanding);
            let expected_state = if outstanding.is_empty() {
                rvsynth::State::Idle
            } else {
                rvsynth::State::Pending
            };
            prop_assert_eq!(m.state().unwrap(), expected_state);
        }
    }
}
