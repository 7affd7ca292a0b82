use std::sync::Mutex;

use serde::Serialize;

use crate::locker::descriptor::JobDescriptor;

/// Structured lifecycle events the locker emits.
///
/// Serialized form carries a top-level `event` discriminator, e.g.
/// `{"event":"locker_polled","limit":8,"locked":3}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LockerEvent {
    LockerStart {
        listen: bool,
        backend_pid: i32,
        poll_interval: Option<f64>,
        wait_period: f64,
        minimum_queue_size: usize,
        maximum_queue_size: usize,
        worker_priorities: Vec<Option<i16>>,
    },
    LockerPolled {
        limit: i64,
        locked: i64,
    },
    JobNotified {
        job: JobDescriptor,
    },
    LockerStop {},
}

/// Destination for [`LockerEvent`]s. The default sink forwards to
/// `tracing`; embedders and tests can substitute their own.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &LockerEvent);
}

/// Emits each event as a JSON payload on the `pglocker` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: &LockerEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => tracing::info!(target: "pglocker", event = %payload),
            Err(error) => tracing::warn!(target: "pglocker", %error, "unserializable event"),
        }
    }
}

/// Captures events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LockerEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count<F: Fn(&LockerEvent) -> bool>(&self, predicate: F) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: &LockerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
