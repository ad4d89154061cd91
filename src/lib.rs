//! # rvsynth - Runtime Verification Monitor Synthesis
//!
//! rvsynth compiles declarative temporal properties over event streams into
//! deterministic, event-driven monitors. A monitor consumes timestamped
//! messages and incrementally computes a three-valued verdict: unknown,
//! satisfied or violated.
//!
//! ## Core Concepts
//!
//! - **Property**: a [`Scope`] (when it must hold) paired with a [`Pattern`] (what must hold)
//! - **Event**: a disjunction of topic-specific predicates, optionally bound to an alias
//! - **`MonitorSpec`**: the compiled state set, reaction table, pool policy and deadlines
//! - **Monitor**: the runtime automaton interpreting one `MonitorSpec`
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{DateTime, Duration};
//! use rvsynth::predicate::{CmpOp, Compare};
//! use rvsynth::{Event, Message, Monitor, Pattern, Property, Scope, TimeBound, Verdict};
//!
//! // "/a causes /b within 1s, and b.x must exceed a.x"
//! let property = Property::new(
//!     Scope::Global,
//!     Pattern::Response {
//!         trigger: Event::any("/a").alias("a"),
//!         behavior: Event::on("/b", Compare::reference("x", CmpOp::Gt, "a", "x")),
//!         bound: TimeBound::from_secs(1.0)?,
//!     },
//! );
//!
//! let monitor = Monitor::compile(&property)?;
//! let t0 = DateTime::UNIX_EPOCH;
//! monitor.launch(t0)?;
//! monitor.on_message("/a", &Message::new().with("x", 5), t0)?;
//! monitor.on_message("/b", &Message::new().with("x", 6), t0 + Duration::milliseconds(300))?;
//! monitor.on_timer(t0 + Duration::seconds(2))?;
//! assert_eq!(monitor.verdict()?, Verdict::Unknown);
//! # Ok::<(), rvsynth::RvError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Property model
pub mod error;
pub mod predicate;
pub mod property;
pub mod time;
pub mod value;

// Compilation and execution
pub mod automaton;
pub mod buffer;
pub mod compiler;
pub mod spec;

// Hosting and emission
pub mod emission;
pub mod hub;

// Re-export primary types at crate root for convenience
pub use automaton::{Monitor, ScopeCallback, Snapshot, Verdict, VerdictCallback};
pub use buffer::{Capacity, Pool, Record};
pub use compiler::compile;
pub use emission::{Emitter, JsonEmitter, SpecManifest};
pub use error::{ExecutionError, RvError, RvResult, ValidationError};
pub use hub::{EventFilter, EventKind, HubConfig, MonitorEvent, MonitorHub, MonitorId, VerdictStream};
pub use predicate::{Bindings, Predicate, PredicateRef};
pub use property::{Event, Pattern, PatternKind, Property, PropertyMeta, Scope, ScopeKind};
pub use spec::{MonitorSpec, State};
pub use time::{TimeBound, Timestamp};
pub use value::{Message, Value};
