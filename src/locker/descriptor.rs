use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The in-memory representation of a claimable job.
///
/// This is the only payload that travels through the job queue; workers
/// re-read the full row under the advisory lock before running anything.
/// The triple doubles as the queue's sort key: lower `priority` is more
/// urgent, ties break on `run_at`, then `job_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobDescriptor {
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_id: i64,
}

impl JobDescriptor {
    /// Decode a `NOTIFY` payload.
    ///
    /// The wire format is a JSON object with `priority`, `run_at`
    /// (ISO-8601) and `job_id`; unknown keys are ignored.
    pub fn from_notification(payload: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

impl Ord for JobDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.run_at.cmp(&other.run_at))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

impl PartialOrd for JobDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
