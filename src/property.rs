//! Property model.
//!
//! A [`Property`] pairs a [`Scope`] (when the property must hold) with a
//! [`Pattern`] (what must hold). Both are built from [`Event`]s: named
//! disjunctions of topic-specific predicates.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::predicate::{Always, Predicate, PredicateRef};
use crate::time::TimeBound;

/// One topic-specific alternative of an [`Event`].
#[derive(Clone)]
pub struct EventBranch {
    /// Topic the message must arrive on.
    pub topic: String,
    /// Test over the message and current bindings.
    pub predicate: PredicateRef,
    /// Declared message type, if the front end knows it.
    pub message_type: Option<String>,
}

impl EventBranch {
    /// Aliases read by this branch's predicate.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.predicate.references()
    }
}

impl fmt::Debug for EventBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBranch")
            .field("topic", &self.topic)
            .field("message_type", &self.message_type)
            .field("references", &self.references())
            .finish_non_exhaustive()
    }
}

/// An event descriptor: a disjunction of topic branches sharing one alias.
///
/// # Examples
///
/// ```
/// use rvsynth::predicate::{CmpOp, Compare};
/// use rvsynth::Event;
///
/// let event = Event::on("/cmd", Compare::constant("speed", CmpOp::Gt, 1.0))
///     .alias("cmd")
///     .or("/cmd_safe", Compare::constant("speed", CmpOp::Gt, 1.0));
/// assert_eq!(event.topics().count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Name for the matched message, referenceable as `@alias`.
    pub alias: Option<String>,
    /// Alternatives; the first branch whose topic and predicate match wins.
    pub branches: Vec<EventBranch>,
}

impl Event {
    /// Event on `topic` guarded by `predicate`.
    pub fn on(topic: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        Self {
            alias: None,
            branches: vec![EventBranch {
                topic: topic.into(),
                predicate: Arc::new(predicate),
                message_type: None,
            }],
        }
    }

    /// Any message on `topic`.
    pub fn any(topic: impl Into<String>) -> Self {
        Self::on(topic, Always)
    }

    /// Adds an alternative branch on another topic.
    #[must_use]
    pub fn or(mut self, topic: impl Into<String>, predicate: impl Predicate + 'static) -> Self {
        self.branches.push(EventBranch {
            topic: topic.into(),
            predicate: Arc::new(predicate),
            message_type: None,
        });
        self
    }

    /// Records matches of this event under `alias`.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Declares the message type of the most recently added branch.
    #[must_use]
    pub fn typed(mut self, message_type: impl Into<String>) -> Self {
        if let Some(branch) = self.branches.last_mut() {
            branch.message_type = Some(message_type.into());
        }
        self
    }

    /// Topics of all branches.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.topic.as_str())
    }

    /// Union of aliases read by any branch.
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        self.branches.iter().flat_map(EventBranch::references).collect()
    }

    /// True if any branch reads `@alias`.
    #[must_use]
    pub fn references_alias(&self, alias: Option<&str>) -> bool {
        alias.is_some_and(|a| self.references().contains(a))
    }
}

/// When a pattern must hold.
#[derive(Debug, Clone)]
pub enum Scope {
    /// For the whole run.
    Global,
    /// From the first activator match onwards.
    After(Event),
    /// From launch until the first terminator match.
    Until(Event),
    /// Every activator-to-terminator episode; reentrant.
    AfterUntil(Event, Event),
}

impl Scope {
    /// Kind of scope.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match self {
            Self::Global => ScopeKind::Global,
            Self::After(_) => ScopeKind::After,
            Self::Until(_) => ScopeKind::Until,
            Self::AfterUntil(_, _) => ScopeKind::AfterUntil,
        }
    }

    /// Event opening the scope, if any.
    #[must_use]
    pub const fn activator(&self) -> Option<&Event> {
        match self {
            Self::After(a) | Self::AfterUntil(a, _) => Some(a),
            Self::Global | Self::Until(_) => None,
        }
    }

    /// Event closing the scope, if any.
    #[must_use]
    pub const fn terminator(&self) -> Option<&Event> {
        match self {
            Self::Until(t) | Self::AfterUntil(_, t) => Some(t),
            Self::Global | Self::After(_) => None,
        }
    }
}

/// Scope shape without its events.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    After,
    Until,
    AfterUntil,
}

impl ScopeKind {
    /// True if the scope needs an activator before the pattern is engaged.
    #[must_use]
    pub const fn has_activator(self) -> bool {
        matches!(self, Self::After | Self::AfterUntil)
    }

    /// True if the scope can open more than once per run.
    #[must_use]
    pub const fn is_reentrant(self) -> bool {
        matches!(self, Self::AfterUntil)
    }
}

/// What must hold within the scope.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// `behavior` never occurs (within the bound).
    Absence { behavior: Event, bound: TimeBound },
    /// `behavior` occurs at least once (within the bound).
    Existence { behavior: Event, bound: TimeBound },
    /// Every `behavior` is preceded by a `trigger` (within the bound).
    Requirement {
        behavior: Event,
        trigger: Event,
        bound: TimeBound,
    },
    /// Every `trigger` is followed by a `behavior` (within the bound).
    Response {
        trigger: Event,
        behavior: Event,
        bound: TimeBound,
    },
    /// Declared for completeness; the compiler rejects it.
    Prevention {
        trigger: Event,
        behavior: Event,
        bound: TimeBound,
    },
}

impl Pattern {
    /// Kind of pattern.
    #[must_use]
    pub const fn kind(&self) -> PatternKind {
        match self {
            Self::Absence { .. } => PatternKind::Absence,
            Self::Existence { .. } => PatternKind::Existence,
            Self::Requirement { .. } => PatternKind::Requirement,
            Self::Response { .. } => PatternKind::Response,
            Self::Prevention { .. } => PatternKind::Prevention,
        }
    }

    /// Time bound of the pattern.
    #[must_use]
    pub const fn bound(&self) -> TimeBound {
        match self {
            Self::Absence { bound, .. }
            | Self::Existence { bound, .. }
            | Self::Requirement { bound, .. }
            | Self::Response { bound, .. }
            | Self::Prevention { bound, .. } => *bound,
        }
    }

    /// The constrained event.
    #[must_use]
    pub const fn behavior(&self) -> &Event {
        match self {
            Self::Absence { behavior, .. }
            | Self::Existence { behavior, .. }
            | Self::Requirement { behavior, .. }
            | Self::Response { behavior, .. }
            | Self::Prevention { behavior, .. } => behavior,
        }
    }

    /// Event the behavior is measured against, if any.
    #[must_use]
    pub const fn trigger(&self) -> Option<&Event> {
        match self {
            Self::Requirement { trigger, .. }
            | Self::Response { trigger, .. }
            | Self::Prevention { trigger, .. } => Some(trigger),
            Self::Absence { .. } | Self::Existence { .. } => None,
        }
    }
}

/// Pattern shape without its events.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Absence,
    Existence,
    Requirement,
    Response,
    Prevention,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absence => "absence",
            Self::Existence => "existence",
            Self::Requirement => "requirement",
            Self::Response => "response",
            Self::Prevention => "prevention",
        };
        f.write_str(name)
    }
}

/// Documentation metadata carried through to emitted monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMeta {
    /// Stable identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Short human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Original property text, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

/// A scoped temporal property.
#[derive(Debug, Clone)]
pub struct Property {
    /// Documentation metadata.
    pub meta: PropertyMeta,
    /// When the pattern must hold.
    pub scope: Scope,
    /// What must hold.
    pub pattern: Pattern,
}

impl Property {
    /// Property without metadata.
    #[must_use]
    pub fn new(scope: Scope, pattern: Pattern) -> Self {
        Self {
            meta: PropertyMeta::default(),
            scope,
            pattern,
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.meta.id = Some(id.into());
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta.title = Some(title.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.meta.description = Some(description.into());
        self
    }

    /// Sets the original property text.
    #[must_use]
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.meta.source_text = Some(text.into());
        self
    }

    /// Checks structural well-formedness.
    ///
    /// Every event needs at least one branch with a non-empty topic, aliases are
    /// unique, and each predicate only reads aliases bound where it is evaluated:
    /// the activator alias for everything inside the scope, plus the trigger
    /// alias for the behavior of Requirement and Response.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let activator = self.scope.activator();
        let terminator = self.scope.terminator();
        let trigger = self.pattern.trigger();
        let behavior = self.pattern.behavior();

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let roles = [
            ("activator", activator),
            ("terminator", terminator),
            ("trigger", trigger),
            ("behavior", Some(behavior)),
        ];
        for (role, event) in roles {
            let Some(event) = event else { continue };
            validate_branches(role, event)?;
            if let Some(alias) = event.alias.as_deref() {
                if alias.trim().is_empty() {
                    return Err(ValidationError::MissingField {
                        field: format!("{role}.alias"),
                    });
                }
                if !seen.insert(alias) {
                    return Err(ValidationError::DuplicateAlias {
                        alias: alias.to_string(),
                    });
                }
            }
        }

        let scope_alias: Vec<&str> = activator.and_then(|a| a.alias.as_deref()).into_iter().collect();

        if let Some(activator) = activator {
            check_bound(activator, &[])?;
        }
        if let Some(terminator) = terminator {
            check_bound(terminator, &scope_alias)?;
        }
        if let Some(trigger) = trigger {
            check_bound(trigger, &scope_alias)?;
        }

        let mut behavior_scope = scope_alias.clone();
        if matches!(self.pattern.kind(), PatternKind::Requirement | PatternKind::Response) {
            if let Some(alias) = trigger.and_then(|t| t.alias.as_deref()) {
                behavior_scope.push(alias);
            }
        }
        check_bound(behavior, &behavior_scope)
    }
}

fn validate_branches(role: &str, event: &Event) -> Result<(), ValidationError> {
    if event.branches.is_empty() {
        return Err(ValidationError::EmptyEvent {
            role: role.to_string(),
        });
    }
    if event.branches.iter().any(|b| b.topic.trim().is_empty()) {
        return Err(ValidationError::MissingField {
            field: format!("{role}.topic"),
        });
    }
    Ok(())
}

fn check_bound(event: &Event, bound: &[&str]) -> Result<(), ValidationError> {
    for branch in &event.branches {
        for alias in branch.references() {
            if !bound.contains(&alias.as_str()) {
                return Err(ValidationError::UnboundAlias {
                    alias,
                    topic: branch.topic.clone(),
                });
            }
        }
    }
    Ok(())
}
