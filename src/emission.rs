//! Emission boundary.
//!
//! Code generators consume a [`SpecManifest`]: a plain-data rendering of a
//! compiled monitor that lists per-topic requirements, the full reaction
//! table in evaluation order, deadline rules and property metadata.
//! Predicates are opaque, so a rule is described by its topic and the
//! aliases its predicate reads.

use serde::{Deserialize, Serialize};

use crate::error::{RvError, RvResult};
use crate::property::{PatternKind, PropertyMeta, ScopeKind};
use crate::spec::{
    BufferAction, BufferPolicy, EventRole, Guard, MonitorSpec, Next, ScopeAction, State, TimerRule,
    WitnessAction,
};
use crate::time::TimeBound;

/// Manifest layout version.
pub const MANIFEST_VERSION: u32 = 1;

/// Serializable description of a compiled monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecManifest {
    pub version: u32,
    pub meta: PropertyMeta,
    pub scope: ScopeKind,
    pub pattern: PatternKind,
    pub bound: TimeBound,
    pub initial: State,
    pub states: Vec<State>,
    pub buffer: BufferPolicy,
    pub topics: Vec<TopicManifest>,
    pub reactions: Vec<RuleManifest>,
    pub timers: Vec<TimerManifest>,
}

/// Subscription requirements for one topic.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicManifest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_types: Vec<String>,
    /// States in which the topic is consumed.
    pub states: Vec<State>,
}

/// One reaction rule. `order` is its position within its `(topic, state)` bucket.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleManifest {
    pub topic: String,
    pub state: State,
    pub order: usize,
    pub role: EventRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub guard: Guard,
    pub buffer: BufferAction,
    pub witness: WitnessAction,
    pub scope: ScopeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<bool>,
    pub next: Next,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerManifest {
    pub state: State,
    #[serde(flatten)]
    pub rule: TimerRule,
}

impl SpecManifest {
    /// Renders `spec` as data.
    #[must_use]
    pub fn from_spec(spec: &MonitorSpec) -> Self {
        let topics = spec
            .topics
            .iter()
            .map(|(topic, info)| TopicManifest {
                topic: topic.clone(),
                message_types: info.message_types.iter().cloned().collect(),
                states: info.states.iter().copied().collect(),
            })
            .collect();

        let reactions = spec
            .reactions
            .iter()
            .flat_map(|(topic, by_state)| {
                by_state.iter().flat_map(move |(state, rules)| {
                    rules.iter().enumerate().map(move |(order, rule)| RuleManifest {
                        topic: topic.clone(),
                        state: *state,
                        order,
                        role: rule.role,
                        alias: rule.alias.clone(),
                        references: rule.predicate.references(),
                        guard: rule.guard,
                        buffer: rule.buffer,
                        witness: rule.witness,
                        scope: rule.scope,
                        verdict: rule.verdict,
                        next: rule.next,
                    })
                })
            })
            .collect();

        let timers = spec
            .timers
            .iter()
            .map(|(state, rule)| TimerManifest {
                state: *state,
                rule: *rule,
            })
            .collect();

        Self {
            version: MANIFEST_VERSION,
            meta: spec.meta.clone(),
            scope: spec.scope,
            pattern: spec.pattern,
            bound: spec.bound,
            initial: spec.initial,
            states: spec.states.iter().copied().collect(),
            buffer: spec.buffer,
            topics,
            reactions,
            timers,
        }
    }

    /// Parses a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns an internal error for malformed input or an unknown version.
    pub fn from_json(s: &str) -> RvResult<Self> {
        let manifest: Self =
            serde_json::from_str(s).map_err(|e| RvError::internal(format!("deserialize manifest: {e}")))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(RvError::internal(format!(
                "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    /// Rules of one bucket, in evaluation order.
    pub fn bucket<'a>(&'a self, topic: &'a str, state: State) -> impl Iterator<Item = &'a RuleManifest> {
        self.reactions
            .iter()
            .filter(move |r| r.topic == topic && r.state == state)
    }
}

/// Turns a compiled monitor into a target artifact.
pub trait Emitter {
    /// Artifact type.
    type Output;

    /// Emits `spec`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn emit(&self, spec: &MonitorSpec) -> RvResult<Self::Output>;
}

/// Emits the manifest as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEmitter {
    /// Indent the output.
    pub pretty: bool,
}

impl JsonEmitter {
    /// Emitter producing indented JSON.
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Emitter for JsonEmitter {
    type Output = String;

    fn emit(&self, spec: &MonitorSpec) -> RvResult<String> {
        let manifest = SpecManifest::from_spec(spec);
        let out = if self.pretty {
            serde_json::to_string_pretty(&manifest)
        } else {
            serde_json::to_string(&manifest)
        };
        out.map_err(|e| RvError::internal(format!("serialize manifest: {e}")))
    }
}
