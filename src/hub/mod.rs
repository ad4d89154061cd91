//! In-process hosting for many monitors.
//!
//! The hub routes messages by topic and republishes monitor callbacks as
//! [`MonitorEvent`]s on bounded subscriber streams. A transport layer can
//! forward those streams; none is provided here.

/// Hub registry and event dispatch worker.
pub mod dispatcher;
/// Identifier, event and filter types.
pub mod events;
/// Subscriber stream handle.
pub mod stream;

pub use dispatcher::{HubConfig, MonitorHub};
pub use events::{EventFilter, EventKind, MonitorEvent, MonitorEventError, MonitorId, SubscriptionId};
pub use stream::VerdictStream;
