//! Identifier and event types for the hub.
//!
//! Events are serializable so hosts can forward them over any transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::buffer::Record;
use crate::time::Timestamp;

/// Unique identifier for a registered monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(Uuid);

impl MonitorId {
    /// Create a new random monitor id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened inside a monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ScopeEntered,
    ScopeExited,
    Satisfied,
    Violated,
}

impl EventKind {
    /// True for `Satisfied` and `Violated`.
    #[must_use]
    pub const fn is_verdict(self) -> bool {
        matches!(self, Self::Satisfied | Self::Violated)
    }
}

/// A monitor callback, as seen by subscribers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorEvent {
    pub event_id: Uuid,
    pub monitor_id: MonitorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    pub kind: EventKind,
    /// Timestamp the monitor reported, not wall-clock time.
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witness: Vec<Record>,
}

/// Errors constructing monitor events.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorEventError {
    /// Scope transitions carry only a timestamp.
    #[error("{kind:?} events carry no witness, got {records} record(s)")]
    UnexpectedWitness { kind: EventKind, records: usize },
}

impl MonitorEvent {
    /// Builds an event.
    ///
    /// # Errors
    ///
    /// Returns `MonitorEventError::UnexpectedWitness` if a scope event is given a witness.
    pub fn new(
        monitor_id: MonitorId,
        property_id: Option<String>,
        kind: EventKind,
        timestamp: Timestamp,
        witness: Vec<Record>,
    ) -> Result<Self, MonitorEventError> {
        if !kind.is_verdict() && !witness.is_empty() {
            return Err(MonitorEventError::UnexpectedWitness {
                kind,
                records: witness.len(),
            });
        }

        Ok(Self {
            event_id: Uuid::new_v4(),
            monitor_id,
            property_id,
            kind,
            timestamp,
            witness,
        })
    }
}

/// Selects which events a subscription receives. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Accepted monitors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub monitors: Vec<MonitorId>,
    /// Accepted event kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<EventKind>,
}

impl EventFilter {
    /// Matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only verdict events.
    #[must_use]
    pub fn verdicts() -> Self {
        Self {
            monitors: Vec::new(),
            kinds: vec![EventKind::Satisfied, EventKind::Violated],
        }
    }

    /// Restricts to one more monitor.
    #[must_use]
    pub fn monitor(mut self, id: MonitorId) -> Self {
        self.monitors.push(id);
        self
    }

    /// True if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &MonitorEvent) -> bool {
        (self.monitors.is_empty() || self.monitors.contains(&event.monitor_id))
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
    }
}
