#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration};

use rvsynth::predicate::{CmpOp, Compare};
use rvsynth::{Event, Message, Monitor, Property, Record, TimeBound, Timestamp};

/// Routes library logs to the test harness output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Milliseconds after the epoch.
pub fn at(ms: i64) -> Timestamp {
    DateTime::UNIX_EPOCH + Duration::milliseconds(ms)
}

pub fn data(v: i64) -> Message {
    Message::new().with("data", v)
}

pub fn x(v: i64) -> Message {
    Message::new().with("x", v)
}

/// Any message on `topic` whose `data` field is positive.
pub fn positive(topic: &str) -> Event {
    Event::on(topic, Compare::constant("data", CmpOp::Gt, 0))
}

pub fn within_ms(ms: i64) -> TimeBound {
    TimeBound::within(Duration::milliseconds(ms)).unwrap()
}

pub fn monitor(property: &Property) -> Monitor {
    Monitor::compile(property).unwrap()
}

pub fn xs(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.message.get("x").and_then(rvsynth::Value::as_int))
        .collect()
}

/// Callback log shared between a monitor and the test body.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn attach(&self, m: &mut Monitor) {
        let l = self.clone();
        m.on_enter_scope(move |ts| l.push(format!("enter@{}", ts.timestamp_millis())));
        let l = self.clone();
        m.on_exit_scope(move |ts| l.push(format!("exit@{}", ts.timestamp_millis())));
        let l = self.clone();
        m.on_success(move |ts, w| l.push(format!("success@{}/{}", ts.timestamp_millis(), w.len())));
        let l = self.clone();
        m.on_violation(move |ts, w| l.push(format!("violation@{}/{}", ts.timestamp_millis(), w.len())));
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
