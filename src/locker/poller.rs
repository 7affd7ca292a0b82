use std::future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db;
use crate::events::LockerEvent;
use crate::locker::context::LockerContext;

/// Runs the polling intake path: one batch poll at startup, one per
/// `poll_interval` tick (when configured), and one whenever the
/// coordinator signals demand through `wake`.
pub(crate) fn spawn(
    context: Arc<LockerContext>,
    poll_interval: Option<Duration>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(context, poll_interval, wake, shutdown))
}

async fn run(
    context: Arc<LockerContext>,
    poll_interval: Option<Duration>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) {
    poll_until_satisfied(&context, &shutdown).await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => poll_until_satisfied(&context, &shutdown).await,
            _ = tick(poll_interval) => poll_until_satisfied(&context, &shutdown).await,
        }
    }
    debug!("poller exited");
}

async fn tick(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => future::pending().await,
    }
}

/// Batch polls repeatedly while each poll comes back full, since a full
/// batch means the supply may not be exhausted.
async fn poll_until_satisfied(context: &LockerContext, shutdown: &CancellationToken) {
    while poll_batch(context).await {
        if shutdown.is_cancelled() {
            break;
        }
    }
}

/// One batch poll. Returns true when a follow-up poll should run
/// immediately.
async fn poll_batch(context: &LockerContext) -> bool {
    let limit = context.job_queue.space() as i64;
    if limit <= 0 {
        return false;
    }

    let excluded = context.registry.snapshot();
    let polled = {
        let mut guard = context.lock_conn.lock().await;
        match guard.as_mut() {
            Some(conn) => db::poll_jobs(conn, &excluded, limit).await,
            None => return false,
        }
    };

    let jobs = match polled {
        Ok(jobs) => jobs,
        Err(error) => {
            warn!(%error, "batch poll failed");
            tokio::time::sleep(error_backoff()).await;
            return false;
        }
    };

    let locked = jobs.len() as i64;
    let mut accepted = Vec::with_capacity(jobs.len());
    for job in jobs {
        if context.registry.try_insert(job.job_id) {
            accepted.push(job);
        } else {
            // Lost the race with the notifier. Both claims ran on the same
            // session, so the lock is held twice; undo one level.
            context.unlock(job.job_id).await;
        }
    }

    let spilled = context.job_queue.push(accepted);
    context.emit(&LockerEvent::LockerPolled { limit, locked });
    context.release_all(spilled).await;

    locked == limit
}

/// Short desynchronized pause after a failed poll, so lockers sharing a
/// struggling database do not retry in lockstep.
fn error_backoff() -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.5..1.5))
}
