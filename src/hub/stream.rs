use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{ExecutionError, RvError, RvResult};

use super::dispatcher::ControlMsg;
use super::events::{MonitorEvent, SubscriptionId};

/// A subscription stream for monitor events.
///
/// Dropping this stream attempts best-effort unregistration.
#[derive(Debug)]
pub struct VerdictStream {
    subscription_id: SubscriptionId,
    rx: Receiver<MonitorEvent>,
    control_tx: Sender<ControlMsg>,
    unregistered: AtomicBool,
}

impl VerdictStream {
    pub(crate) fn new(
        subscription_id: SubscriptionId,
        rx: Receiver<MonitorEvent>,
        control_tx: Sender<ControlMsg>,
    ) -> Self {
        Self {
            subscription_id,
            rx,
            control_tx,
            unregistered: AtomicBool::new(false),
        }
    }

    /// Id of this subscription.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Best-effort explicit unregistration. Non-blocking and idempotent.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.control_tx.try_send(ControlMsg::Unsubscribe {
            subscription_id: self.subscription_id,
        });
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> RvResult<MonitorEvent> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> RvResult<MonitorEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => RvError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Next event if one is already queued.
    pub fn try_recv(&self) -> RvResult<Option<MonitorEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }
}

fn disconnected() -> RvError {
    RvError::Execution(ExecutionError::Disconnected {
        path: "verdict_stream".to_string(),
    })
}

impl Drop for VerdictStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
