use std::sync::Arc;

use sqlx::postgres::PgConnection;
use tokio::sync::Mutex;
use tracing::warn;

use crate::db;
use crate::events::{LockerEvent, LogSink};
use crate::locker::descriptor::JobDescriptor;
use crate::locker::job_queue::JobQueue;
use crate::locker::registry::LockRegistry;

/// State shared between the coordinator, the notifier listener, and the
/// poller: the job queue, the lock registry, the dedicated lock session,
/// and the event sink.
///
/// Every advisory lock this locker holds lives on `lock_conn`, so every
/// release must go through it too. The connection mutex is only ever held
/// for the duration of a single statement.
pub(crate) struct LockerContext {
    pub job_queue: Arc<JobQueue>,
    pub registry: LockRegistry,
    pub lock_conn: Mutex<Option<PgConnection>>,
    pub log_sink: Arc<dyn LogSink>,
}

impl LockerContext {
    pub fn emit(&self, event: &LockerEvent) {
        self.log_sink.emit(event);
    }

    pub async fn try_advisory_lock(&self, job_id: i64) -> anyhow::Result<bool> {
        let mut guard = self.lock_conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("lock connection is closed"))?;
        db::try_advisory_lock(conn, job_id).await
    }

    /// Best-effort unlock on the lock session. Failures are logged and
    /// tolerated: a lock this session no longer holds is already free, and
    /// one it cannot reach will be freed when the session ends.
    pub async fn unlock(&self, job_id: i64) {
        let mut guard = self.lock_conn.lock().await;
        match guard.as_mut() {
            Some(conn) => match db::advisory_unlock(conn, job_id).await {
                Ok(true) => {}
                Ok(false) => warn!(job_id, "advisory lock was not held at release"),
                Err(error) => warn!(job_id, %error, "failed to release advisory lock"),
            },
            None => warn!(job_id, "lock connection closed before release"),
        }
    }

    /// Releases the advisory lock and drops the ID from the registry.
    pub async fn release(&self, job_id: i64) {
        self.unlock(job_id).await;
        self.registry.remove(job_id);
    }

    pub async fn release_all(&self, jobs: impl IntoIterator<Item = JobDescriptor>) {
        for job in jobs {
            self.release(job.job_id).await;
        }
    }
}
