//! Monitor specifications.
//!
//! A [`MonitorSpec`] is the compiled, immutable form of a property: a state set,
//! an initial state, a buffer policy, an ordered reaction table keyed by
//! topic then state, and per-state deadline rules. The runtime automaton is a
//! generic interpreter over this data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::Capacity;
use crate::predicate::PredicateRef;
use crate::property::{PatternKind, PropertyMeta, ScopeKind};
use crate::time::TimeBound;

/// Monitor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Not launched, or shut down.
    Off,
    /// Waiting for the scope activator.
    Inactive,
    /// Scope open, single-state pattern core.
    Engaged,
    /// Scope open, no outstanding obligation.
    Idle,
    /// Scope open, at least one obligation outstanding.
    Pending,
    /// Episode settled without violation; the scope is still open.
    Safe,
    /// Satisfied.
    True,
    /// Violated.
    False,
}

impl State {
    /// True for `TRUE` and `FALSE`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::True | Self::False)
    }

    /// True if the monitor is not running.
    #[must_use]
    pub const fn is_off(self) -> bool {
        matches!(self, Self::Off)
    }

    /// Upper-case state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Inactive => "INACTIVE",
            Self::Engaged => "ENGAGED",
            Self::Idle => "IDLE",
            Self::Pending => "PENDING",
            Self::Safe => "SAFE",
            Self::True => "TRUE",
            Self::False => "FALSE",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which property event a rule reacts to.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    Activator,
    Terminator,
    Trigger,
    Behavior,
}

/// How a rule's predicate is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Against the witness bindings only.
    Message,
    /// Holds if some pooled record, bound under its alias, satisfies it.
    AnyPooled,
    /// Like `AnyPooled`, and removes every pooled record that satisfies it.
    ConsumePooled,
    /// Holds unless the predicate is false whatever the pooled alias binds to.
    Partial,
}

/// Effect on the pool.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferAction {
    Keep,
    Push,
    Replace,
    Clear,
}

/// Effect on the witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessAction {
    Keep,
    /// Append the matched message.
    Record,
    /// Append the oldest pooled record.
    RecordPending,
    /// Append the oldest pooled record, then the matched message.
    RecordPendingAndMessage,
    /// Clear the witness.
    Reset,
}

/// Scope callback fired by a rule.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeAction {
    None,
    Enter,
    Exit,
}

/// Successor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Next {
    Stay,
    To { state: State },
    /// `empty` if the pool drained, `otherwise` if records remain.
    Drain { empty: State, otherwise: State },
}

/// One reaction: tried in bucket order, the first rule whose guard holds fires.
#[derive(Clone)]
pub struct Rule {
    /// Property event this rule was compiled from.
    pub role: EventRole,
    /// Topic the message arrives on.
    pub topic: String,
    /// Alias the matched message is recorded under.
    pub alias: Option<String>,
    /// Test applied to the message.
    pub predicate: PredicateRef,
    /// How `predicate` is evaluated.
    pub guard: Guard,
    /// Effect on the pool.
    pub buffer: BufferAction,
    /// Effect on the witness.
    pub witness: WitnessAction,
    /// Scope callback to fire.
    pub scope: ScopeAction,
    /// Verdict settled by this rule, if any.
    pub verdict: Option<bool>,
    /// Successor state.
    pub next: Next,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("role", &self.role)
            .field("topic", &self.topic)
            .field("alias", &self.alias)
            .field("guard", &self.guard)
            .field("buffer", &self.buffer)
            .field("witness", &self.witness)
            .field("scope", &self.scope)
            .field("verdict", &self.verdict)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Reference point of a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Time the current scope episode opened.
    EpisodeStart,
    /// Timestamp of the oldest pooled record.
    OldestPooled,
}

/// What happens once a deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEffect {
    /// Drop expired pooled records; no transition.
    Evict,
    Transition {
        witness: WitnessAction,
        verdict: Option<bool>,
        next: State,
    },
}

/// Deadline rule for one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerRule {
    /// Where the bound is measured from.
    pub anchor: Anchor,
    /// What happens when the bound passes.
    pub effect: TimerEffect,
}

/// Pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferPolicy {
    /// How many records may be pooled.
    pub capacity: Capacity,
    /// True if behavior predicates read the pooled record's alias.
    pub correlated: bool,
}

/// Per-topic subscription requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Message types declared for this topic by any event.
    pub message_types: BTreeSet<String>,
    /// States in which at least one rule listens on this topic.
    pub states: BTreeSet<State>,
}

/// Compiled monitor.
#[derive(Debug, Clone)]
pub struct MonitorSpec {
    /// Metadata copied from the property.
    pub meta: PropertyMeta,
    /// Kind of scope.
    pub scope: ScopeKind,
    /// Kind of pattern.
    pub pattern: PatternKind,
    /// Time bound of the pattern.
    pub bound: TimeBound,
    /// States reachable after launch.
    pub states: BTreeSet<State>,
    /// State entered on launch.
    pub initial: State,
    /// Pool configuration.
    pub buffer: BufferPolicy,
    /// topic → state → ordered rules.
    pub reactions: BTreeMap<String, BTreeMap<State, Vec<Rule>>>,
    /// Deadline rule per state.
    pub timers: BTreeMap<State, TimerRule>,
    /// Subscription requirements per topic.
    pub topics: BTreeMap<String, TopicInfo>,
}

impl MonitorSpec {
    /// Rules for `(topic, state)`, in evaluation order.
    #[must_use]
    pub fn rules(&self, topic: &str, state: State) -> &[Rule] {
        self.reactions
            .get(topic)
            .and_then(|by_state| by_state.get(&state))
            .map_or(&[], Vec::as_slice)
    }

    /// Deadline rule of `state`, if any.
    #[must_use]
    pub fn timer(&self, state: State) -> Option<&TimerRule> {
        self.timers.get(&state)
    }

    /// True if some rule listens on `topic`.
    #[must_use]
    pub fn listens_to(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Topics the monitor listens on.
    pub fn topic_names(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// True if the scope opens on launch instead of on an activator.
    #[must_use]
    pub const fn enters_on_launch(&self) -> bool {
        !self.scope.has_activator()
    }

    /// Number of rules across all buckets.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.reactions
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Property id, or `"anonymous"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.meta.id.as_deref().unwrap_or("anonymous")
    }
}
