use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::LockerEvent;
use crate::locker::context::LockerContext;
use crate::locker::descriptor::JobDescriptor;

/// Runs the notification intake path on its own task. The subscription to
/// `locker_<pid>` is already established by the coordinator before the
/// registration row becomes visible to enqueuers.
pub(crate) fn spawn(
    listener: PgListener,
    context: Arc<LockerContext>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(listener, context, shutdown))
}

async fn run(mut listener: PgListener, context: Arc<LockerContext>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            notification = listener.recv() => match notification {
                Ok(notification) => {
                    handle_notification(&context, notification.payload()).await;
                }
                Err(error) => {
                    // PgListener reconnects and re-subscribes on its own;
                    // the pause keeps a persistent failure from spinning.
                    warn!(%error, "notification stream error");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            },
        }
    }

    if let Err(error) = listener.unlisten_all().await {
        warn!(%error, "failed to unlisten during shutdown");
    }
    debug!("notifier listener exited");
}

/// Decide whether a notified candidate is worth claiming, claim it, and
/// queue it. The registry insert settles races with the poller; the DB
/// lock attempt settles races with other lockers.
async fn handle_notification(context: &LockerContext, payload: &str) {
    let job = match JobDescriptor::from_notification(payload) {
        Ok(job) => job,
        Err(error) => {
            warn!(%error, payload, "undecodable job notification");
            return;
        }
    };
    context.emit(&LockerEvent::JobNotified { job });

    // A full queue only takes candidates that beat its worst entry; the
    // rest would be spilled straight back, so skip the lock attempt.
    if context.job_queue.space() == 0 {
        if let Some(threshold) = context.job_queue.lowest_priority() {
            if job.priority >= threshold {
                return;
            }
        }
    }

    if !context.registry.try_insert(job.job_id) {
        return;
    }

    match context.try_advisory_lock(job.job_id).await {
        Ok(true) => {
            let spilled = context.job_queue.push([job]);
            context.release_all(spilled).await;
        }
        Ok(false) => {
            // Held elsewhere; some other locker got there first.
            context.registry.remove(job.job_id);
        }
        Err(error) => {
            warn!(job_id = job.job_id, %error, "advisory lock attempt failed");
            // Lock state unknown; release conservatively.
            context.release(job.job_id).await;
        }
    }
}
