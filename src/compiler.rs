//! Rule compiler.
//!
//! Turns a [`Property`] into a [`MonitorSpec`]. The scope wrapper and the
//! pattern core are compiled independently and composed:
//!
//! - the scope contributes `INACTIVE` and the activator rule (After, AfterUntil)
//!   and a terminator rule in every open state of the core (Until, AfterUntil);
//! - the core contributes its engaged states, behavior/trigger rules, the pool
//!   policy and the deadline rules.
//!
//! Scope rules are installed first, so in a shared `(topic, state)` bucket a
//! message that closes the scope never also counts as pattern behavior.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::buffer::Capacity;
use crate::error::{RvResult, ValidationError};
use crate::property::{Event, Pattern, PatternKind, Property, ScopeKind};
use crate::spec::{
    Anchor, BufferAction, BufferPolicy, EventRole, Guard, MonitorSpec, Next, Rule, ScopeAction,
    State, TimerEffect, TimerRule, TopicInfo, WitnessAction,
};
use crate::time::TimeBound;

/// Compiles a property into a monitor specification.
///
/// # Errors
///
/// Returns `ValidationError::UnsupportedPattern` for `Prevention`, and any
/// error reported by [`Property::validate`].
///
/// # Examples
///
/// ```
/// use rvsynth::predicate::{CmpOp, Compare};
/// use rvsynth::{compile, Event, Pattern, Property, Scope, State, TimeBound};
///
/// let property = Property::new(
///     Scope::Global,
///     Pattern::Absence {
///         behavior: Event::on("/b", Compare::constant("data", CmpOp::Gt, 0)),
///         bound: TimeBound::Unbounded,
///     },
/// );
/// let spec = compile(&property).unwrap();
/// assert_eq!(spec.initial, State::Engaged);
/// assert_eq!(spec.rules("/b", State::Engaged).len(), 1);
/// ```
pub fn compile(property: &Property) -> RvResult<MonitorSpec> {
    property.validate()?;

    let scope = property.scope.kind();
    let pattern = &property.pattern;
    let bound = pattern.bound();
    let plan = Plan::for_pattern(pattern, scope, bound)?;
    let initial = if scope.has_activator() {
        State::Inactive
    } else {
        plan.entry
    };

    let mut b = SpecBuilder::default();
    b.states.insert(initial);

    if let Some(activator) = property.scope.activator() {
        b.add(
            EventRole::Activator,
            activator,
            State::Inactive,
            Reaction::enter(plan.entry),
        );
    }

    if let Some(terminator) = property.scope.terminator() {
        for &state in &plan.open {
            let reaction = if scope.is_reentrant() {
                plan.episode_close(state)
            } else {
                plan.scope_close(state)
            };
            b.add(EventRole::Terminator, terminator, state, reaction);
        }
    }

    plan.install(pattern, &mut b);

    let spec = MonitorSpec {
        meta: property.meta.clone(),
        scope,
        pattern: plan.kind,
        bound,
        states: b.states,
        initial,
        buffer: BufferPolicy {
            capacity: plan.capacity,
            correlated: plan.correlated,
        },
        reactions: b.reactions,
        timers: b.timers,
        topics: b.topics,
    };

    debug!(
        property = spec.label(),
        scope = ?spec.scope,
        pattern = %spec.pattern,
        states = spec.states.len(),
        rules = spec.rule_count(),
        capacity = ?spec.buffer.capacity,
        "compiled monitor"
    );

    Ok(spec)
}

/// A rule without its event: what happens once the guard holds.
#[derive(Debug, Clone, Copy)]
struct Reaction {
    guard: Guard,
    buffer: BufferAction,
    witness: WitnessAction,
    scope: ScopeAction,
    verdict: Option<bool>,
    next: Next,
}

impl Reaction {
    const fn goto(witness: WitnessAction, state: State) -> Self {
        Self {
            guard: Guard::Message,
            buffer: BufferAction::Keep,
            witness,
            scope: ScopeAction::None,
            verdict: None,
            next: Next::To { state },
        }
    }

    const fn verdict(witness: WitnessAction, value: bool) -> Self {
        let state = if value { State::True } else { State::False };
        Self {
            verdict: Some(value),
            ..Self::goto(witness, state)
        }
    }

    const fn enter(engaged: State) -> Self {
        Self {
            scope: ScopeAction::Enter,
            ..Self::goto(WitnessAction::Record, engaged)
        }
    }

    /// Terminator that closes the scope and settles the verdict.
    const fn close(witness: WitnessAction, value: bool) -> Self {
        Self {
            scope: ScopeAction::Exit,
            ..Self::verdict(witness, value)
        }
    }

    const fn exit() -> Self {
        Self {
            buffer: BufferAction::Clear,
            scope: ScopeAction::Exit,
            ..Self::goto(WitnessAction::Reset, State::Inactive)
        }
    }

    const fn buffer(guard: Guard, buffer: BufferAction, next: Next) -> Self {
        Self {
            guard,
            buffer,
            witness: WitnessAction::Keep,
            scope: ScopeAction::None,
            verdict: None,
            next,
        }
    }
}

/// Shape of the pattern core for a given scope.
#[derive(Debug, Clone)]
struct Plan {
    kind: PatternKind,
    entry: State,
    /// States in which the scope is open and the terminator is live.
    open: Vec<State>,
    capacity: Capacity,
    correlated: bool,
    reentrant: bool,
    bound: TimeBound,
}

impl Plan {
    fn for_pattern(
        pattern: &Pattern,
        scope: ScopeKind,
        bound: TimeBound,
    ) -> Result<Self, ValidationError> {
        let reentrant = scope.is_reentrant();
        let mut plan = Self {
            kind: pattern.kind(),
            entry: State::Engaged,
            open: vec![State::Engaged],
            capacity: Capacity::Zero,
            correlated: false,
            reentrant,
            bound,
        };

        match pattern {
            Pattern::Absence { .. } => {
                if reentrant && bound.is_bounded() {
                    plan.open.push(State::Safe);
                }
            }
            Pattern::Existence { .. } => {
                if reentrant {
                    plan.open.push(State::Safe);
                }
            }
            Pattern::Requirement {
                behavior, trigger, ..
            } => {
                plan.correlated = behavior.references_alias(trigger.alias.as_deref());
                plan.capacity = match (plan.correlated, bound.is_bounded()) {
                    (true, _) => Capacity::Unbounded,
                    (false, true) => Capacity::One,
                    (false, false) => Capacity::Zero,
                };
                if plan.capacity == Capacity::Zero && reentrant {
                    plan.open.push(State::Safe);
                }
            }
            Pattern::Response {
                trigger, behavior, ..
            } => {
                plan.correlated = behavior.references_alias(trigger.alias.as_deref());
                plan.capacity = if plan.correlated {
                    Capacity::Unbounded
                } else {
                    Capacity::One
                };
                plan.entry = State::Idle;
                plan.open = vec![State::Idle, State::Pending];
            }
            Pattern::Prevention { .. } => {
                return Err(ValidationError::UnsupportedPattern {
                    pattern: PatternKind::Prevention.to_string(),
                });
            }
        }

        Ok(plan)
    }

    /// Terminator of a single-episode scope (Until).
    fn scope_close(&self, state: State) -> Reaction {
        match (self.kind, state) {
            (PatternKind::Existence, _) => Reaction::close(WitnessAction::Record, false),
            (PatternKind::Response, State::Pending) => {
                Reaction::close(WitnessAction::RecordPendingAndMessage, false)
            }
            _ => Reaction::close(WitnessAction::Record, true),
        }
    }

    /// Terminator of a reentrant scope (AfterUntil).
    fn episode_close(&self, state: State) -> Reaction {
        match (self.kind, state) {
            (PatternKind::Existence, State::Engaged) => {
                Reaction::close(WitnessAction::Record, false)
            }
            (PatternKind::Response, State::Pending) => {
                Reaction::close(WitnessAction::RecordPendingAndMessage, false)
            }
            _ => Reaction::exit(),
        }
    }

    fn install(&self, pattern: &Pattern, b: &mut SpecBuilder) {
        match pattern {
            Pattern::Absence { behavior, .. } => self.install_absence(behavior, b),
            Pattern::Existence { behavior, .. } => self.install_existence(behavior, b),
            Pattern::Requirement {
                behavior, trigger, ..
            } => self.install_requirement(behavior, trigger, b),
            Pattern::Response {
                trigger, behavior, ..
            } => self.install_response(trigger, behavior, b),
            Pattern::Prevention { .. } => {}
        }
    }

    fn install_absence(&self, behavior: &Event, b: &mut SpecBuilder) {
        b.add(
            EventRole::Behavior,
            behavior,
            State::Engaged,
            Reaction::verdict(WitnessAction::Record, false),
        );

        if self.bound.is_bounded() {
            let effect = if self.reentrant {
                transition(WitnessAction::Keep, None, State::Safe)
            } else {
                transition(WitnessAction::Keep, Some(true), State::True)
            };
            b.timer(State::Engaged, Anchor::EpisodeStart, effect);
        }
    }

    fn install_existence(&self, behavior: &Event, b: &mut SpecBuilder) {
        let found = if self.reentrant {
            Reaction::goto(WitnessAction::Record, State::Safe)
        } else {
            Reaction::verdict(WitnessAction::Record, true)
        };
        b.add(EventRole::Behavior, behavior, State::Engaged, found);

        if self.bound.is_bounded() {
            b.timer(
                State::Engaged,
                Anchor::EpisodeStart,
                transition(WitnessAction::Keep, Some(false), State::False),
            );
        }
    }

    fn install_requirement(&self, behavior: &Event, trigger: &Event, b: &mut SpecBuilder) {
        if self.capacity == Capacity::Zero {
            let established = if self.reentrant {
                Reaction::goto(WitnessAction::Record, State::Safe)
            } else {
                Reaction::verdict(WitnessAction::Record, true)
            };
            b.add(EventRole::Trigger, trigger, State::Engaged, established);
            b.add(
                EventRole::Behavior,
                behavior,
                State::Engaged,
                Reaction::verdict(WitnessAction::Record, false),
            );
            return;
        }

        let store = if self.capacity == Capacity::One {
            BufferAction::Replace
        } else {
            BufferAction::Push
        };
        b.add(
            EventRole::Trigger,
            trigger,
            State::Engaged,
            Reaction::buffer(Guard::Message, store, Next::Stay),
        );
        b.add(
            EventRole::Behavior,
            behavior,
            State::Engaged,
            Reaction::buffer(Guard::AnyPooled, BufferAction::Keep, Next::Stay),
        );
        let unmatched = if self.correlated {
            Reaction {
                guard: Guard::Partial,
                ..Reaction::verdict(WitnessAction::Record, false)
            }
        } else {
            Reaction::verdict(WitnessAction::Record, false)
        };
        b.add(EventRole::Behavior, behavior, State::Engaged, unmatched);

        if self.bound.is_bounded() {
            b.timer(State::Engaged, Anchor::OldestPooled, TimerEffect::Evict);
        }
    }

    fn install_response(&self, trigger: &Event, behavior: &Event, b: &mut SpecBuilder) {
        b.add(
            EventRole::Trigger,
            trigger,
            State::Idle,
            Reaction::buffer(
                Guard::Message,
                BufferAction::Push,
                Next::To {
                    state: State::Pending,
                },
            ),
        );
        if self.capacity == Capacity::Unbounded {
            b.add(
                EventRole::Trigger,
                trigger,
                State::Pending,
                Reaction::buffer(Guard::Message, BufferAction::Push, Next::Stay),
            );
        }
        b.add(
            EventRole::Behavior,
            behavior,
            State::Pending,
            Reaction::buffer(
                Guard::ConsumePooled,
                BufferAction::Keep,
                Next::Drain {
                    empty: State::Idle,
                    otherwise: State::Pending,
                },
            ),
        );

        if self.bound.is_bounded() {
            b.timer(
                State::Pending,
                Anchor::OldestPooled,
                transition(WitnessAction::RecordPending, Some(false), State::False),
            );
        }
    }
}

const fn transition(witness: WitnessAction, verdict: Option<bool>, next: State) -> TimerEffect {
    TimerEffect::Transition {
        witness,
        verdict,
        next,
    }
}

#[derive(Default)]
struct SpecBuilder {
    states: BTreeSet<State>,
    reactions: BTreeMap<String, BTreeMap<State, Vec<Rule>>>,
    timers: BTreeMap<State, TimerRule>,
    topics: BTreeMap<String, TopicInfo>,
}

impl SpecBuilder {
    /// Appends one rule per event branch to the `(branch topic, state)` bucket.
    fn add(&mut self, role: EventRole, event: &Event, state: State, reaction: Reaction) {
        self.states.insert(state);
        match reaction.next {
            Next::Stay => {}
            Next::To { state: next } => {
                self.states.insert(next);
            }
            Next::Drain { empty, otherwise } => {
                self.states.insert(empty);
                self.states.insert(otherwise);
            }
        }

        for branch in &event.branches {
            let rule = Rule {
                role,
                topic: branch.topic.clone(),
                alias: event.alias.clone(),
                predicate: Arc::clone(&branch.predicate),
                guard: reaction.guard,
                buffer: reaction.buffer,
                witness: reaction.witness,
                scope: reaction.scope,
                verdict: reaction.verdict,
                next: reaction.next,
            };
            self.reactions
                .entry(branch.topic.clone())
                .or_default()
                .entry(state)
                .or_default()
                .push(rule);

            let info = self.topics.entry(branch.topic.clone()).or_default();
            info.states.insert(state);
            if let Some(t) = &branch.message_type {
                info.message_types.insert(t.clone());
            }
        }
    }

    fn timer(&mut self, state: State, anchor: Anchor, effect: TimerEffect) {
        self.states.insert(state);
        if let TimerEffect::Transition { next, .. } = effect {
            self.states.insert(next);
        }
        self.timers.insert(state, TimerRule { anchor, effect });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{CmpOp, Compare};
    use crate::property::Scope;

    fn bound(secs: f64) -> TimeBound {
        TimeBound::from_secs(secs).unwrap()
    }

    fn requirement(correlated: bool, bound: TimeBound) -> Pattern {
        let behavior = if correlated {
            Event::on("/b", Compare::reference("x", CmpOp::Eq, "a", "x"))
        } else {
            Event::any("/b")
        };
        Pattern::Requirement {
            behavior,
            trigger: Event::any("/a").alias("a"),
            bound,
        }
    }

    fn response(correlated: bool, bound: TimeBound) -> Pattern {
        let behavior = if correlated {
            Event::on("/b", Compare::reference("x", CmpOp::Gt, "a", "x"))
        } else {
            Event::any("/b")
        };
        Pattern::Response {
            trigger: Event::any("/a").alias("a"),
            behavior,
            bound,
        }
    }

    #[test]
    fn prevention_is_rejected() {
        let prop = Property::new(
            Scope::Global,
            Pattern::Prevention {
                trigger: Event::any("/a"),
                behavior: Event::any("/b"),
                bound: TimeBound::Unbounded,
            },
        );
        let err = compile(&prop).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedPattern {
                pattern: "prevention".to_string()
            }
            .into()
        );
    }

    #[test]
    fn validation_errors_surface_at_compile_time() {
        let prop = Property::new(
            Scope::Global,
            Pattern::Absence {
                behavior: Event::on("/b", Compare::reference("x", CmpOp::Eq, "nope", "x")),
                bound: TimeBound::Unbounded,
            },
        );
        assert!(compile(&prop).unwrap_err().is_validation());
    }

    #[test]
    fn global_absence_has_no_inactive_state() {
        let prop = Property::new(
            Scope::Global,
            Pattern::Absence {
                behavior: Event::any("/b"),
                bound: TimeBound::Unbounded,
            },
        );
        let spec = compile(&prop).unwrap();
        assert_eq!(spec.initial, State::Engaged);
        assert!(!spec.states.contains(&State::Inactive));
        assert!(spec.timers.is_empty());
        assert!(spec.enters_on_launch());
        assert_eq!(spec.buffer.capacity, Capacity::Zero);
    }

    #[test]
    fn after_until_absence_with_bound_uses_safe() {
        let prop = Property::new(
            Scope::AfterUntil(Event::any("/p").alias("p"), Event::any("/q")),
            Pattern::Absence {
                behavior: Event::any("/b"),
                bound: bound(1.0),
            },
        );
        let spec = compile(&prop).unwrap();
        assert_eq!(spec.initial, State::Inactive);
        assert!(spec.states.contains(&State::Safe));

        let timer = spec.timer(State::Engaged).unwrap();
        assert_eq!(timer.anchor, Anchor::EpisodeStart);
        assert!(matches!(
            timer.effect,
            TimerEffect::Transition {
                next: State::Safe,
                verdict: None,
                ..
            }
        ));

        // Terminator is live in SAFE and returns to INACTIVE.
        let close = &spec.rules("/q", State::Safe)[0];
        assert_eq!(close.scope, ScopeAction::Exit);
        assert_eq!(close.next, Next::To { state: State::Inactive });
        assert_eq!(close.witness, WitnessAction::Reset);
        assert_eq!(close.buffer, BufferAction::Clear);

        // Behavior is ignored in SAFE.
        assert!(spec.rules("/b", State::Safe).is_empty());
    }

    #[test]
    fn after_absence_with_bound_is_terminal() {
        let prop = Property::new(
            Scope::After(Event::any("/p")),
            Pattern::Absence {
                behavior: Event::any("/b"),
                bound: bound(1.0),
            },
        );
        let spec = compile(&prop).unwrap();
        assert!(!spec.states.contains(&State::Safe));
        assert!(matches!(
            spec.timer(State::Engaged).unwrap().effect,
            TimerEffect::Transition {
                next: State::True,
                verdict: Some(true),
                ..
            }
        ));
    }

    #[test]
    fn requirement_capacity_follows_reference_and_bound() {
        let cases = [
            (false, TimeBound::Unbounded, Capacity::Zero),
            (false, bound(1.0), Capacity::One),
            (true, TimeBound::Unbounded, Capacity::Unbounded),
            (true, bound(1.0), Capacity::Unbounded),
        ];
        for (correlated, b, expected) in cases {
            let spec = compile(&Property::new(Scope::Global, requirement(correlated, b))).unwrap();
            assert_eq!(spec.buffer.capacity, expected, "correlated={correlated} bound={b}");
            assert_eq!(spec.buffer.correlated, correlated);
        }
    }

    #[test]
    fn correlated_requirement_checks_pool_before_violation() {
        let spec = compile(&Property::new(Scope::Global, requirement(true, TimeBound::Unbounded))).unwrap();
        let rules = spec.rules("/b", State::Engaged);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].guard, Guard::AnyPooled);
        assert_eq!(rules[0].next, Next::Stay);
        assert_eq!(rules[1].guard, Guard::Partial);
        assert_eq!(rules[1].verdict, Some(false));
    }

    #[test]
    fn response_capacity_and_states() {
        let spec = compile(&Property::new(Scope::Global, response(false, bound(1.0)))).unwrap();
        assert_eq!(spec.initial, State::Idle);
        assert_eq!(spec.buffer.capacity, Capacity::One);
        // With a single pending slot, later triggers are not buffered.
        assert!(spec.rules("/a", State::Pending).is_empty());
        assert_eq!(spec.timer(State::Pending).unwrap().anchor, Anchor::OldestPooled);
        assert!(spec.timer(State::Idle).is_none());

        let spec = compile(&Property::new(Scope::Global, response(true, bound(1.0)))).unwrap();
        assert_eq!(spec.buffer.capacity, Capacity::Unbounded);
        assert_eq!(spec.rules("/a", State::Pending).len(), 1);
        assert_eq!(spec.rules("/b", State::Pending)[0].guard, Guard::ConsumePooled);
    }

    #[test]
    fn until_response_pending_close_is_violation() {
        let prop = Property::new(Scope::Until(Event::any("/q")), response(false, TimeBound::Unbounded));
        let spec = compile(&prop).unwrap();
        assert_eq!(spec.rules("/q", State::Idle)[0].verdict, Some(true));
        let pending = &spec.rules("/q", State::Pending)[0];
        assert_eq!(pending.verdict, Some(false));
        assert_eq!(pending.witness, WitnessAction::RecordPendingAndMessage);

        // Every terminator closes the scope, whatever verdict it settles.
        for state in [State::Idle, State::Pending] {
            assert_eq!(spec.rules("/q", state)[0].scope, ScopeAction::Exit);
        }
    }

    #[test]
    fn terminator_precedes_behavior_in_shared_bucket() {
        let prop = Property::new(
            Scope::Until(Event::on("/b", Compare::constant("stop", CmpOp::Eq, true))),
            Pattern::Absence {
                behavior: Event::any("/b"),
                bound: TimeBound::Unbounded,
            },
        );
        let spec = compile(&prop).unwrap();
        let rules = spec.rules("/b", State::Engaged);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].role, EventRole::Terminator);
        assert_eq!(rules[1].role, EventRole::Behavior);
    }

    #[test]
    fn disjunction_installs_rule_per_topic() {
        let prop = Property::new(
            Scope::After(Event::any("/p").typed("std_msgs/Empty")),
            Pattern::Existence {
                behavior: Event::any("/b1").typed("std_msgs/Int32").or("/b2", crate::predicate::Always),
                bound: TimeBound::Unbounded,
            },
        );
        let spec = compile(&prop).unwrap();
        assert_eq!(spec.rules("/b1", State::Engaged).len(), 1);
        assert_eq!(spec.rules("/b2", State::Engaged).len(), 1);
        assert_eq!(spec.topic_names().collect::<Vec<_>>(), vec!["/b1", "/b2", "/p"]);
        assert!(spec.topics["/b1"].message_types.contains("std_msgs/Int32"));
        assert!(spec.topics["/p"].states.contains(&State::Inactive));
        assert!(spec.listens_to("/p"));
        assert!(!spec.listens_to("/q"));
    }

    #[test]
    fn compile_is_deterministic() {
        let prop = Property::new(
            Scope::AfterUntil(Event::any("/p"), Event::any("/q")),
            response(true, bound(2.0)),
        );
        let a = compile(&prop).unwrap();
        let b = compile(&prop).unwrap();
        assert_eq!(a.states, b.states);
        assert_eq!(a.timers, b.timers);
        assert_eq!(format!("{:?}", a.reactions), format!("{:?}", b.reactions));
    }
}
