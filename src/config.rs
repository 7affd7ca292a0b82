use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgConnection;

use crate::events::{LogSink, TracingSink};
use crate::locker::worker::WorkerStartHook;

pub const DEFAULT_WORKER_COUNT: usize = 6;
pub const DEFAULT_WORKER_PRIORITIES: [i16; 3] = [10, 30, 50];
pub const DEFAULT_MINIMUM_QUEUE_SIZE: usize = 2;
pub const DEFAULT_MAXIMUM_QUEUE_SIZE: usize = 8;
pub const DEFAULT_WAIT_PERIOD: Duration = Duration::from_millis(100);

/// Runtime configuration for a [`crate::Locker`].
///
/// All knobs are fixed for the lifetime of the locker; there is no
/// reconfiguration after start.
pub struct LockerConfig {
    /// Enable the notification-driven path. Off means poll-only.
    pub listen: bool,
    /// Period between timer-driven batch polls. `None` disables periodic
    /// polling; demand-triggered polls still occur.
    pub poll_interval: Option<Duration>,
    /// Idle tick granularity of the coordinator's control loop.
    pub wait_period: Duration,
    /// Low-water mark that triggers a demand poll after a completion.
    pub minimum_queue_size: usize,
    /// Hard cap on the job queue.
    pub maximum_queue_size: usize,
    /// Number of worker tasks.
    pub worker_count: usize,
    /// Priority ceilings, position-for-position per worker. Positions
    /// beyond the list default to unbounded.
    pub worker_priorities: Vec<Option<i16>>,
    /// Caller-supplied dedicated connection; bypasses pool checkout for
    /// the locker's lock session.
    pub connection: Option<PgConnection>,
    /// Invoked once per worker, from that worker's own task.
    pub on_worker_start: Option<WorkerStartHook>,
    /// Destination for structured locker events.
    pub log_sink: Arc<dyn LogSink>,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            listen: true,
            poll_interval: None,
            wait_period: DEFAULT_WAIT_PERIOD,
            minimum_queue_size: DEFAULT_MINIMUM_QUEUE_SIZE,
            maximum_queue_size: DEFAULT_MAXIMUM_QUEUE_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            worker_priorities: DEFAULT_WORKER_PRIORITIES.map(Some).to_vec(),
            connection: None,
            on_worker_start: None,
            log_sink: Arc::new(TracingSink),
        }
    }
}

impl LockerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `PGLOCKER_*` environment variables (and a
    /// local `.env`, if present). Unset keys fall back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(listen) = env_bool("PGLOCKER_LISTEN") {
            config.listen = listen;
        }
        if let Some(value) = env_nonempty("PGLOCKER_POLL_INTERVAL") {
            let secs: f64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("PGLOCKER_POLL_INTERVAL is not a number: {value}"))?;
            config.poll_interval = Some(Duration::from_secs_f64(secs));
        }
        if let Some(value) = env_nonempty("PGLOCKER_WAIT_PERIOD") {
            let secs: f64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("PGLOCKER_WAIT_PERIOD is not a number: {value}"))?;
            config.wait_period = Duration::from_secs_f64(secs);
        }
        if let Some(value) = env_nonempty("PGLOCKER_MINIMUM_QUEUE_SIZE") {
            config.minimum_queue_size = value.parse()?;
        }
        if let Some(value) = env_nonempty("PGLOCKER_MAXIMUM_QUEUE_SIZE") {
            config.maximum_queue_size = value.parse()?;
        }
        if let Some(value) = env_nonempty("PGLOCKER_WORKER_COUNT") {
            config.worker_count = value.parse()?;
        }
        if let Some(value) = env_nonempty("PGLOCKER_WORKER_PRIORITIES") {
            config.worker_priorities = parse_priorities(&value)?;
        }

        Ok(config)
    }

    /// Ceilings resolved to exactly `worker_count` entries, padding with
    /// "no ceiling" past the explicit list.
    pub fn resolved_worker_priorities(&self) -> Vec<Option<i16>> {
        let mut priorities = self.worker_priorities.clone();
        priorities.truncate(self.worker_count);
        priorities.resize(self.worker_count, None);
        priorities
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }
        if self.maximum_queue_size == 0 {
            anyhow::bail!("maximum_queue_size must be at least 1");
        }
        Ok(())
    }
}

impl fmt::Debug for LockerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockerConfig")
            .field("listen", &self.listen)
            .field("poll_interval", &self.poll_interval)
            .field("wait_period", &self.wait_period)
            .field("minimum_queue_size", &self.minimum_queue_size)
            .field("maximum_queue_size", &self.maximum_queue_size)
            .field("worker_count", &self.worker_count)
            .field("worker_priorities", &self.worker_priorities)
            .field("connection", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

/// Comma-separated ceilings; `any` (or an empty slot) means unbounded,
/// e.g. `10,30,50,any`.
fn parse_priorities(value: &str) -> anyhow::Result<Vec<Option<i16>>> {
    value
        .split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() || part.eq_ignore_ascii_case("any") {
                Ok(None)
            } else {
                part.parse::<i16>()
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("bad worker priority: {part}"))
            }
        })
        .collect()
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_nonempty(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
