//! Monitor hub and event dispatcher worker.
//!
//! The hub owns a set of monitors, routes each message to the monitors that
//! listen on its topic, and forwards every monitor callback to subscribers.
//! Callbacks enqueue events with a non-blocking `try_send`, so a slow
//! subscriber never stalls a monitor while it holds its lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, never, select, Receiver, Sender, TrySendError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::automaton::{Monitor, Verdict};
use crate::buffer::Record;
use crate::compiler::compile;
use crate::error::{ExecutionError, RvError, RvResult};
use crate::property::Property;
use crate::spec::MonitorSpec;
use crate::time::Timestamp;
use crate::value::Message;

use super::events::{EventFilter, EventKind, MonitorEvent, MonitorId, SubscriptionId};
use super::stream::VerdictStream;

#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Max queued monitor events before new ones are dropped.
    pub event_queue_capacity: usize,
    /// Per-subscription stream buffer capacity.
    pub stream_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 4096,
            stream_capacity: 1024,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Subscribe {
        subscription_id: SubscriptionId,
        filter: EventFilter,
        stream_tx: Sender<MonitorEvent>,
        reply: Sender<()>,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
}

#[derive(Debug)]
struct SubscriptionEntry {
    tx: Sender<MonitorEvent>,
    filter: EventFilter,
}

#[derive(Debug, Default)]
struct Registry {
    monitors: BTreeMap<MonitorId, Arc<Monitor>>,
    by_topic: HashMap<String, Vec<MonitorId>>,
}

impl Registry {
    fn routed(&self, topic: &str) -> Vec<Arc<Monitor>> {
        self.by_topic
            .get(topic)
            .into_iter()
            .flatten()
            .filter_map(|id| self.monitors.get(id).cloned())
            .collect()
    }
}

/// Hosts many monitors and streams their callbacks to subscribers.
///
/// A dedicated worker thread fans queued events out to subscriptions.
#[derive(Debug)]
pub struct MonitorHub {
    cfg: HubConfig,
    registry: Mutex<Registry>,
    control_tx: Sender<ControlMsg>,
    event_tx: Sender<MonitorEvent>,
    dropped_events: Arc<AtomicU64>,
    dropped_deliveries: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHub {
    /// Starts the dispatcher worker.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the worker thread cannot be spawned.
    pub fn new(cfg: HubConfig) -> RvResult<Self> {
        let (control_tx, control_rx) = bounded::<ControlMsg>(64);
        let (event_tx, event_rx) = bounded::<MonitorEvent>(cfg.event_queue_capacity.max(1));

        let dropped_deliveries = Arc::new(AtomicU64::new(0));
        let thread_dropped = Arc::clone(&dropped_deliveries);
        let join = thread::Builder::new()
            .name("rvsynth-hub".to_string())
            .spawn(move || worker_loop(&thread_dropped, control_rx, event_rx))
            .map_err(|e| RvError::internal(format!("failed to spawn hub worker: {e}")))?;

        Ok(Self {
            cfg,
            registry: Mutex::new(Registry::default()),
            control_tx,
            event_tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
            dropped_deliveries,
            join: Mutex::new(Some(join)),
        })
    }

    fn registry(&self, context: &str) -> RvResult<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| {
            RvError::Execution(ExecutionError::LockPoisoned {
                context: format!("hub.{context}"),
            })
        })
    }

    /// Adds a monitor for `spec`. The monitor starts `OFF`.
    pub fn register(&self, spec: Arc<MonitorSpec>) -> RvResult<MonitorId> {
        let id = MonitorId::new();
        let mut monitor = Monitor::new(Arc::clone(&spec));
        self.wire(&mut monitor, id, spec.meta.id.clone());

        let mut reg = self.registry("register")?;
        for topic in spec.topic_names() {
            reg.by_topic.entry(topic.to_string()).or_default().push(id);
        }
        reg.monitors.insert(id, Arc::new(monitor));

        debug!(monitor = %id, property = spec.label(), topics = spec.topics.len(), "monitor registered");
        Ok(id)
    }

    /// Compiles and registers `property`.
    pub fn register_property(&self, property: &Property) -> RvResult<MonitorId> {
        self.register(Arc::new(compile(property)?))
    }

    /// Removes a monitor and its topic routes.
    pub fn unregister(&self, id: MonitorId) -> RvResult<()> {
        let mut reg = self.registry("unregister")?;
        if reg.monitors.remove(&id).is_none() {
            return Err(unknown(id));
        }
        for ids in reg.by_topic.values_mut() {
            ids.retain(|m| *m != id);
        }
        reg.by_topic.retain(|_, ids| !ids.is_empty());
        Ok(())
    }

    /// Handle to a registered monitor.
    pub fn monitor(&self, id: MonitorId) -> RvResult<Arc<Monitor>> {
        self.registry("monitor")?
            .monitors
            .get(&id)
            .cloned()
            .ok_or_else(|| unknown(id))
    }

    /// Ids of all registered monitors.
    pub fn ids(&self) -> RvResult<Vec<MonitorId>> {
        Ok(self.registry("ids")?.monitors.keys().copied().collect())
    }

    /// Launches every registered monitor.
    ///
    /// All monitors are checked first; if any of them is already running
    /// none is launched.
    ///
    /// # Errors
    ///
    /// `ExecutionError::AlreadyActive` naming the state of the first running
    /// monitor, or lock poisoning.
    pub fn launch(&self, ts: Timestamp) -> RvResult<()> {
        let monitors = self.all("launch")?;
        for monitor in &monitors {
            let state = monitor.state()?;
            if !state.is_off() {
                return Err(ExecutionError::AlreadyActive {
                    state: state.to_string(),
                }
                .into());
            }
        }
        for monitor in &monitors {
            monitor.launch(ts)?;
        }
        Ok(())
    }

    /// Shuts down every registered monitor.
    ///
    /// All monitors are checked first; if any of them is stopped none is
    /// shut down.
    ///
    /// # Errors
    ///
    /// `ExecutionError::NotActive`, or lock poisoning.
    pub fn shutdown(&self, ts: Timestamp) -> RvResult<()> {
        let monitors = self.all("shutdown")?;
        for monitor in &monitors {
            if monitor.state()?.is_off() {
                return Err(ExecutionError::NotActive.into());
            }
        }
        for monitor in &monitors {
            monitor.shutdown(ts)?;
        }
        Ok(())
    }

    /// Applies the deadline check of every registered monitor.
    ///
    /// # Errors
    ///
    /// The first error reported by a monitor.
    pub fn on_timer(&self, ts: Timestamp) -> RvResult<()> {
        for monitor in self.all("on_timer")? {
            monitor.on_timer(ts)?;
        }
        Ok(())
    }

    /// Routes a message to the monitors listening on `topic`.
    ///
    /// Returns how many of them consumed it.
    pub fn on_message(&self, topic: &str, message: &Message, ts: Timestamp) -> RvResult<usize> {
        let routed = self.registry("on_message")?.routed(topic);
        let mut consumed = 0;
        for monitor in routed {
            if monitor.on_message(topic, message, ts)? {
                consumed += 1;
            }
        }
        Ok(consumed)
    }

    /// Current verdict of one monitor.
    pub fn verdict(&self, id: MonitorId) -> RvResult<Verdict> {
        self.monitor(id)?.verdict()
    }

    /// Current verdict of every monitor.
    pub fn verdicts(&self) -> RvResult<BTreeMap<MonitorId, Verdict>> {
        let monitors: Vec<(MonitorId, Arc<Monitor>)> = self
            .registry("verdicts")?
            .monitors
            .iter()
            .map(|(id, m)| (*id, Arc::clone(m)))
            .collect();
        monitors
            .into_iter()
            .map(|(id, m)| m.verdict().map(|v| (id, v)))
            .collect()
    }

    /// Opens a stream of events accepted by `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> RvResult<VerdictStream> {
        let subscription_id = SubscriptionId::new();
        let (stream_tx, stream_rx) = bounded::<MonitorEvent>(self.cfg.stream_capacity.max(1));
        let stream = VerdictStream::new(subscription_id, stream_rx, self.control_tx.clone());

        let (reply_tx, reply_rx) = bounded::<()>(1);
        self.control_tx
            .send(ControlMsg::Subscribe {
                subscription_id,
                filter,
                stream_tx,
                reply: reply_tx,
            })
            .map_err(|_| control_disconnected())?;

        // Wait for the worker to install the subscription.
        reply_rx.recv().map_err(|_| control_disconnected())?;

        Ok(stream)
    }

    /// Events lost because the hub queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Deliveries lost because a subscriber stream was full.
    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped_deliveries.load(Ordering::Relaxed)
    }

    fn all(&self, context: &str) -> RvResult<Vec<Arc<Monitor>>> {
        Ok(self.registry(context)?.monitors.values().cloned().collect())
    }

    fn wire(&self, monitor: &mut Monitor, id: MonitorId, property_id: Option<String>) {
        let publisher = Publisher {
            monitor_id: id,
            property_id,
            tx: self.event_tx.clone(),
            dropped: Arc::clone(&self.dropped_events),
        };

        let p = publisher.clone();
        monitor.on_violation(move |ts, witness| p.publish(EventKind::Violated, ts, witness));
        let p = publisher.clone();
        monitor.on_success(move |ts, witness| p.publish(EventKind::Satisfied, ts, witness));
        let p = publisher.clone();
        monitor.on_enter_scope(move |ts| p.publish(EventKind::ScopeEntered, ts, &[]));
        monitor.on_exit_scope(move |ts| publisher.publish(EventKind::ScopeExited, ts, &[]));
    }
}

#[derive(Clone)]
struct Publisher {
    monitor_id: MonitorId,
    property_id: Option<String>,
    tx: Sender<MonitorEvent>,
    dropped: Arc<AtomicU64>,
}

impl Publisher {
    fn publish(&self, kind: EventKind, ts: Timestamp, witness: &[Record]) {
        let Ok(event) = MonitorEvent::new(
            self.monitor_id,
            self.property_id.clone(),
            kind,
            ts,
            witness.to_vec(),
        ) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // Never block the monitor: drop if the queue is full.
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(monitor = %self.monitor_id, ?kind, "hub event queue full, event dropped");
            }
        }
    }
}

impl Drop for MonitorHub {
    fn drop(&mut self) {
        // Close our senders so the worker can terminate once streams are gone.
        let (dummy_control_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_control_tx));

        let (dummy_event_tx, _) = bounded::<MonitorEvent>(1);
        drop(std::mem::replace(&mut self.event_tx, dummy_event_tx));

        if let Ok(mut reg) = self.registry.lock() {
            reg.monitors.clear();
        }

        if let Ok(mut guard) = self.join.lock() {
            // Detach: live streams keep the control channel open, so joining
            // here could wait forever. The worker exits on its own.
            drop(guard.take());
        }
    }
}

fn unknown(id: MonitorId) -> RvError {
    RvError::Execution(ExecutionError::UnknownMonitor { id: id.to_string() })
}

fn control_disconnected() -> RvError {
    RvError::Execution(ExecutionError::Disconnected {
        path: "hub_control".to_string(),
    })
}

fn worker_loop(
    dropped_deliveries: &AtomicU64,
    control_rx: Receiver<ControlMsg>,
    event_rx: Receiver<MonitorEvent>,
) {
    let mut subs: HashMap<SubscriptionId, SubscriptionEntry> = HashMap::new();

    let mut control_rx = control_rx;
    let mut event_rx = event_rx;
    let mut control_closed = false;
    let mut events_closed = false;

    loop {
        select! {
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::Subscribe { subscription_id, filter, stream_tx, reply }) => {
                        subs.insert(subscription_id, SubscriptionEntry { tx: stream_tx, filter });
                        let _ = reply.send(());
                    }
                    Ok(ControlMsg::Unsubscribe { subscription_id }) => {
                        subs.remove(&subscription_id);
                    }
                    Err(_) => {
                        control_closed = true;
                    }
                }
            }
            recv(event_rx) -> msg => {
                match msg {
                    Ok(event) => {
                        subs.retain(|_, sub| {
                            if !sub.filter.matches(&event) {
                                return true;
                            }
                            match sub.tx.try_send(event.clone()) {
                                Ok(()) => true,
                                Err(TrySendError::Full(_)) => {
                                    dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                                    true
                                }
                                Err(TrySendError::Disconnected(_)) => false,
                            }
                        });
                    }
                    Err(_) => {
                        events_closed = true;
                    }
                }
            }
        }

        if control_closed && events_closed {
            break;
        }
        // A closed channel is always ready; park it so the loop does not spin.
        if control_closed {
            control_rx = never();
        }
        if events_closed {
            event_rx = never();
        }
    }
}
