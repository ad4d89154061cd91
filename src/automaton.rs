//! Runtime automaton.
//!
//! A [`Monitor`] interprets one [`MonitorSpec`] against a live stream of
//! timestamped messages. Every public operation takes the instance lock for
//! its whole duration, so each call is atomic with respect to the others.
//! Callbacks run synchronously while the lock is held; they must not call
//! back into the same monitor.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::buffer::{Pool, Record};
use crate::compiler::compile;
use crate::error::{ExecutionError, RvError, RvResult};
use crate::predicate::Bindings;
use crate::property::Property;
use crate::spec::{
    Anchor, BufferAction, Guard, MonitorSpec, Next, Rule, ScopeAction, State, TimerEffect,
    WitnessAction,
};
use crate::time::Timestamp;
use crate::value::Message;

/// Three-valued monitor outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No terminal state reached yet.
    #[default]
    Unknown,
    /// The property held.
    Satisfied,
    /// The property was violated.
    Violated,
}

impl Verdict {
    /// `Some(true)` for satisfied, `Some(false)` for violated.
    #[must_use]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Satisfied => Some(true),
            Self::Violated => Some(false),
        }
    }

    /// True once a terminal verdict was reached.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<bool> for Verdict {
    fn from(value: bool) -> Self {
        if value {
            Self::Satisfied
        } else {
            Self::Violated
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Satisfied => f.write_str("true"),
            Self::Violated => f.write_str("false"),
        }
    }
}

/// Called with the timestamp and witness of a terminal verdict.
pub type VerdictCallback = Box<dyn Fn(Timestamp, &[Record]) + Send + Sync>;

/// Called with the timestamp of a scope transition.
pub type ScopeCallback = Box<dyn Fn(Timestamp) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    violation: Option<VerdictCallback>,
    success: Option<VerdictCallback>,
    enter_scope: Option<ScopeCallback>,
    exit_scope: Option<ScopeCallback>,
}

/// Read-only copy of a monitor's instance state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current automaton state.
    pub state: State,
    /// Current verdict.
    pub verdict: Verdict,
    /// Records justifying the verdict, in order.
    pub witness: Vec<Record>,
    /// Pooled records, oldest first.
    pub pool: Vec<Record>,
    /// Timestamp of the last `launch`.
    pub launch_time: Option<Timestamp>,
    /// Timestamp of the last `shutdown`.
    pub shutdown_time: Option<Timestamp>,
    /// Timestamp of the last state change.
    pub last_transition_time: Option<Timestamp>,
    /// Start of the open scope episode, if any.
    pub episode_start: Option<Timestamp>,
}

#[derive(Debug)]
struct Instance {
    state: State,
    verdict: Verdict,
    pool: Pool,
    witness: Vec<Record>,
    launch_time: Option<Timestamp>,
    shutdown_time: Option<Timestamp>,
    last_transition_time: Option<Timestamp>,
    episode_start: Option<Timestamp>,
    latest_seen: Option<Timestamp>,
}

impl Instance {
    fn off(spec: &MonitorSpec) -> Self {
        Self {
            state: State::Off,
            verdict: Verdict::Unknown,
            pool: Pool::new(spec.buffer.capacity),
            witness: Vec::new(),
            launch_time: None,
            shutdown_time: None,
            last_transition_time: None,
            episode_start: None,
            latest_seen: None,
        }
    }

    fn witness_bindings(&self) -> Bindings<'_> {
        bindings_of(&self.witness)
    }
}

/// Binds every aliased witness record; later records shadow earlier ones.
fn bindings_of(witness: &[Record]) -> Bindings<'_> {
    let mut bindings = Bindings::new();
    for record in witness {
        if let Some(alias) = record.alias.as_deref() {
            bindings.bind(alias, &record.message);
        }
    }
    bindings
}

/// Pending callback invocations produced by one step.
#[derive(Debug, Default)]
struct Signals {
    enter: bool,
    exit: bool,
    verdict: Option<bool>,
}

/// A runtime monitor for one compiled property.
///
/// # Examples
///
/// ```
/// use chrono::{DateTime, Duration};
/// use rvsynth::predicate::{CmpOp, Compare};
/// use rvsynth::{Event, Message, Monitor, Pattern, Property, Scope, TimeBound, Verdict};
///
/// let property = Property::new(
///     Scope::Global,
///     Pattern::Absence {
///         behavior: Event::on("/b", Compare::constant("data", CmpOp::Gt, 0)),
///         bound: TimeBound::Unbounded,
///     },
/// );
/// let monitor = Monitor::compile(&property).unwrap();
/// let t0 = DateTime::UNIX_EPOCH;
///
/// monitor.launch(t0).unwrap();
/// let consumed = monitor
///     .on_message("/b", &Message::new().with("data", 1), t0 + Duration::seconds(1))
///     .unwrap();
/// assert!(consumed);
/// assert_eq!(monitor.verdict().unwrap(), Verdict::Violated);
/// ```
pub struct Monitor {
    spec: Arc<MonitorSpec>,
    inner: Mutex<Instance>,
    callbacks: Callbacks,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("property", &self.spec.label())
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates an `OFF` monitor for a compiled specification.
    #[must_use]
    pub fn new(spec: Arc<MonitorSpec>) -> Self {
        let inner = Mutex::new(Instance::off(&spec));
        Self {
            spec,
            inner,
            callbacks: Callbacks::default(),
        }
    }

    /// Compiles `property` and wraps the result.
    ///
    /// # Errors
    ///
    /// Returns any compilation error.
    pub fn compile(property: &Property) -> RvResult<Self> {
        Ok(Self::new(Arc::new(compile(property)?)))
    }

    /// The compiled specification this monitor interprets.
    #[must_use]
    pub fn spec(&self) -> &Arc<MonitorSpec> {
        &self.spec
    }

    /// Registers the violation callback, replacing any previous one.
    pub fn on_violation(
        &mut self,
        f: impl Fn(Timestamp, &[Record]) + Send + Sync + 'static,
    ) -> &mut Self {
        self.callbacks.violation = Some(Box::new(f));
        self
    }

    /// Registers the success callback, replacing any previous one.
    pub fn on_success(&mut self, f: impl Fn(Timestamp, &[Record]) + Send + Sync + 'static) -> &mut Self {
        self.callbacks.success = Some(Box::new(f));
        self
    }

    /// Registers the callback fired when a scope episode opens.
    pub fn on_enter_scope(&mut self, f: impl Fn(Timestamp) + Send + Sync + 'static) -> &mut Self {
        self.callbacks.enter_scope = Some(Box::new(f));
        self
    }

    /// Registers the callback fired when a scope episode closes.
    pub fn on_exit_scope(&mut self, f: impl Fn(Timestamp) + Send + Sync + 'static) -> &mut Self {
        self.callbacks.exit_scope = Some(Box::new(f));
        self
    }

    fn lock(&self, context: &str) -> RvResult<MutexGuard<'_, Instance>> {
        self.inner.lock().map_err(|_| {
            RvError::Execution(ExecutionError::LockPoisoned {
                context: format!("monitor.{context}"),
            })
        })
    }

    /// Starts the monitor at `ts`.
    ///
    /// Clears pool, witness and verdict, and enters the initial state. For
    /// scopes without an activator the scope opens immediately.
    ///
    /// # Errors
    ///
    /// `ExecutionError::AlreadyActive` if the monitor is not `OFF`.
    pub fn launch(&self, ts: Timestamp) -> RvResult<()> {
        let mut guard = self.lock("launch")?;
        if !guard.state.is_off() {
            return Err(ExecutionError::AlreadyActive {
                state: guard.state.to_string(),
            }
            .into());
        }

        let inst = &mut *guard;
        *inst = Instance::off(&self.spec);
        inst.state = self.spec.initial;
        inst.launch_time = Some(ts);
        inst.last_transition_time = Some(ts);
        inst.latest_seen = Some(ts);

        info!(property = self.spec.label(), state = %inst.state, %ts, "monitor launched");

        if self.spec.enters_on_launch() {
            inst.episode_start = Some(ts);
            self.fire(
                inst,
                ts,
                &Signals {
                    enter: true,
                    ..Signals::default()
                },
            );
        }
        Ok(())
    }

    /// Stops the monitor at `ts`. The verdict and witness stay inspectable.
    ///
    /// # Errors
    ///
    /// `ExecutionError::NotActive` if the monitor is already `OFF`.
    pub fn shutdown(&self, ts: Timestamp) -> RvResult<()> {
        let mut inst = self.lock("shutdown")?;
        if inst.state.is_off() {
            return Err(ExecutionError::NotActive.into());
        }
        info!(
            property = self.spec.label(),
            state = %inst.state,
            verdict = %inst.verdict,
            %ts,
            "monitor shut down"
        );
        inst.shutdown_time = Some(ts);
        inst.state = State::Off;
        Ok(())
    }

    /// Discards the verdict and witness of a stopped monitor.
    ///
    /// # Errors
    ///
    /// `ExecutionError::AlreadyActive` if the monitor is running.
    pub fn reset(&self) -> RvResult<()> {
        let mut inst = self.lock("reset")?;
        if !inst.state.is_off() {
            return Err(ExecutionError::AlreadyActive {
                state: inst.state.to_string(),
            }
            .into());
        }
        *inst = Instance::off(&self.spec);
        Ok(())
    }

    /// Applies the deadline check for the current state. No-op while `OFF`.
    ///
    /// # Errors
    ///
    /// Lock poisoning, or an internal error if the compiled rules and the
    /// pool disagree.
    pub fn on_timer(&self, ts: Timestamp) -> RvResult<()> {
        let mut guard = self.lock("on_timer")?;
        let inst = &mut *guard;
        if inst.state.is_off() {
            return Ok(());
        }
        self.observe_time(inst, ts);
        self.check_deadline(inst, ts)
    }

    /// Feeds one message. Returns `true` if a rule consumed it.
    ///
    /// Pending deadlines are applied first. Messages arriving while `OFF` or
    /// after a terminal verdict are never consumed.
    ///
    /// # Errors
    ///
    /// Lock poisoning, or an internal error if the compiled rules and the
    /// pool disagree.
    pub fn on_message(&self, topic: &str, message: &Message, ts: Timestamp) -> RvResult<bool> {
        let mut guard = self.lock("on_message")?;
        let inst = &mut *guard;
        if inst.state.is_off() {
            return Ok(false);
        }
        self.observe_time(inst, ts);
        self.check_deadline(inst, ts)?;
        if inst.state.is_terminal() {
            return Ok(false);
        }

        let Some(rule) = self
            .spec
            .rules(topic, inst.state)
            .iter()
            .find(|rule| self.guard_holds(inst, rule, message))
        else {
            return Ok(false);
        };

        self.apply(inst, rule, topic, message, ts)?;
        Ok(true)
    }

    /// Current verdict.
    ///
    /// # Errors
    ///
    /// `ExecutionError::LockPoisoned` if a callback panicked.
    pub fn verdict(&self) -> RvResult<Verdict> {
        Ok(self.lock("verdict")?.verdict)
    }

    /// Current automaton state.
    ///
    /// # Errors
    ///
    /// `ExecutionError::LockPoisoned` if a callback panicked.
    pub fn state(&self) -> RvResult<State> {
        Ok(self.lock("state")?.state)
    }

    /// Copy of the witness.
    ///
    /// # Errors
    ///
    /// `ExecutionError::LockPoisoned` if a callback panicked.
    pub fn witness(&self) -> RvResult<Vec<Record>> {
        Ok(self.lock("witness")?.witness.clone())
    }

    /// Copy of the whole instance state.
    ///
    /// # Errors
    ///
    /// `ExecutionError::LockPoisoned` if a callback panicked.
    pub fn snapshot(&self) -> RvResult<Snapshot> {
        let inst = self.lock("snapshot")?;
        Ok(Snapshot {
            state: inst.state,
            verdict: inst.verdict,
            witness: inst.witness.clone(),
            pool: inst.pool.iter().cloned().collect(),
            launch_time: inst.launch_time,
            shutdown_time: inst.shutdown_time,
            last_transition_time: inst.last_transition_time,
            episode_start: inst.episode_start,
        })
    }

    fn observe_time(&self, inst: &mut Instance, ts: Timestamp) {
        match inst.latest_seen {
            Some(latest) if ts < latest => {
                warn!(
                    property = self.spec.label(),
                    %ts,
                    %latest,
                    "non-monotonic timestamp"
                );
            }
            _ => inst.latest_seen = Some(ts),
        }
    }

    fn guard_holds(&self, inst: &Instance, rule: &Rule, message: &Message) -> bool {
        let witness = inst.witness_bindings();
        match rule.guard {
            Guard::Message => rule.predicate.test(message, &witness),
            Guard::Partial => rule.predicate.test_partial(message, &witness) != Some(false),
            Guard::AnyPooled | Guard::ConsumePooled => inst
                .pool
                .iter_newest_first()
                .any(|pooled| test_pooled(rule, message, &witness, pooled)),
        }
    }

    fn apply(
        &self,
        inst: &mut Instance,
        rule: &Rule,
        topic: &str,
        message: &Message,
        ts: Timestamp,
    ) -> RvResult<()> {
        let record = Record::new(topic, ts, message.clone(), rule.alias.clone());

        let mut witness = Vec::new();
        match rule.witness {
            WitnessAction::Keep | WitnessAction::Reset => {}
            WitnessAction::Record => witness.push(record.clone()),
            WitnessAction::RecordPending => witness.push(oldest_pooled(inst)?),
            WitnessAction::RecordPendingAndMessage => {
                witness.push(oldest_pooled(inst)?);
                witness.push(record.clone());
            }
        }

        if rule.guard == Guard::ConsumePooled {
            let bindings = bindings_of(&inst.witness);
            let discharged = inst
                .pool
                .consume_where(|pooled| test_pooled(rule, message, &bindings, pooled));
            debug!(
                property = self.spec.label(),
                discharged = discharged.len(),
                remaining = inst.pool.len(),
                "pooled obligations discharged"
            );
        }

        match rule.buffer {
            BufferAction::Keep => {}
            BufferAction::Push => inst.pool.push(record),
            BufferAction::Replace => {
                if !inst.pool.replace(record) {
                    debug!(
                        property = self.spec.label(),
                        %ts,
                        "pooled record is newer, late record not stored"
                    );
                }
            }
            BufferAction::Clear => inst.pool.clear(),
        }

        if rule.witness == WitnessAction::Reset {
            inst.witness.clear();
        }
        inst.witness.extend(witness);

        let mut signals = Signals {
            verdict: rule.verdict,
            ..Signals::default()
        };
        match rule.scope {
            ScopeAction::None => {}
            ScopeAction::Enter => {
                inst.episode_start = Some(ts);
                signals.enter = true;
            }
            ScopeAction::Exit => {
                inst.episode_start = None;
                signals.exit = true;
            }
        }

        let next = match rule.next {
            Next::Stay => inst.state,
            Next::To { state } => state,
            Next::Drain { empty, otherwise } => {
                if inst.pool.is_empty() {
                    empty
                } else {
                    otherwise
                }
            }
        };

        debug!(
            property = self.spec.label(),
            role = ?rule.role,
            topic,
            from = %inst.state,
            to = %next,
            "rule fired"
        );
        self.transition(inst, next, rule.verdict, ts);
        self.fire(inst, ts, &signals);
        Ok(())
    }

    fn check_deadline(&self, inst: &mut Instance, now: Timestamp) -> RvResult<()> {
        let Some(timer) = self.spec.timer(inst.state) else {
            return Ok(());
        };
        let Some(bound) = self.spec.bound.duration() else {
            return Ok(());
        };

        match timer.effect {
            TimerEffect::Evict => {
                let evicted = inst.pool.evict_expired(now, bound);
                if evicted > 0 {
                    debug!(
                        property = self.spec.label(),
                        evicted,
                        remaining = inst.pool.len(),
                        "evicted expired pooled records"
                    );
                }
                Ok(())
            }
            TimerEffect::Transition {
                witness,
                verdict,
                next,
            } => {
                let reference = match timer.anchor {
                    Anchor::EpisodeStart => inst.episode_start,
                    Anchor::OldestPooled => inst.pool.oldest().map(|r| r.timestamp),
                };
                let Some(reference) = reference else {
                    return Ok(());
                };
                if !self.spec.bound.has_elapsed(reference, now) {
                    return Ok(());
                }

                match witness {
                    WitnessAction::Keep => {}
                    WitnessAction::RecordPending => {
                        let pending = oldest_pooled(inst)?;
                        inst.witness.push(pending);
                    }
                    other => {
                        return Err(RvError::internal(format!(
                            "deadline rule cannot apply witness action {other:?}"
                        )));
                    }
                }

                debug!(
                    property = self.spec.label(),
                    from = %inst.state,
                    to = %next,
                    %now,
                    "deadline passed"
                );
                self.transition(inst, next, verdict, now);
                self.fire(
                    inst,
                    now,
                    &Signals {
                        verdict,
                        ..Signals::default()
                    },
                );
                Ok(())
            }
        }
    }

    fn transition(&self, inst: &mut Instance, next: State, verdict: Option<bool>, ts: Timestamp) {
        if next != inst.state {
            inst.state = next;
            inst.last_transition_time = Some(ts);
        }
        if let Some(value) = verdict {
            inst.verdict = Verdict::from(value);
            info!(
                property = self.spec.label(),
                verdict = %inst.verdict,
                witness = inst.witness.len(),
                %ts,
                "verdict reached"
            );
        }
    }

    fn fire(&self, inst: &Instance, ts: Timestamp, signals: &Signals) {
        if signals.enter {
            debug!(property = self.spec.label(), %ts, "scope entered");
            if let Some(cb) = &self.callbacks.enter_scope {
                cb(ts);
            }
        }
        if signals.exit {
            debug!(property = self.spec.label(), %ts, "scope exited");
            if let Some(cb) = &self.callbacks.exit_scope {
                cb(ts);
            }
        }
        let callback = match signals.verdict {
            Some(true) => &self.callbacks.success,
            Some(false) => &self.callbacks.violation,
            None => return,
        };
        if let Some(cb) = callback {
            cb(ts, &inst.witness);
        }
    }
}

fn test_pooled<'a>(rule: &Rule, message: &Message, witness: &Bindings<'a>, pooled: &'a Record) -> bool {
    let mut bindings = witness.clone();
    if let Some(alias) = pooled.alias.as_deref() {
        bindings.bind(alias, &pooled.message);
    }
    rule.predicate.test(message, &bindings)
}

fn oldest_pooled(inst: &Instance) -> RvResult<Record> {
    inst.pool
        .oldest()
        .cloned()
        .ok_or_else(|| RvError::internal("pending witness requested from an empty pool"))
}
