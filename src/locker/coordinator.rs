use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::{Connection, PgPool};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LockerConfig;
use crate::db;
use crate::events::LockerEvent;
use crate::locker::context::LockerContext;
use crate::locker::job_queue::JobQueue;
use crate::locker::registry::LockRegistry;
use crate::locker::result_queue::{result_channel, ResultReceiver};
use crate::locker::worker::{JobRunner, Worker};
use crate::locker::{listener, poller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// The coordinator of one worker process: discovers ready jobs through
/// notifications and polling, claims them with session advisory locks,
/// feeds a bounded pool of workers, and unwinds all of it on shutdown.
///
/// A locker announces itself in the shared `lockers` table under the
/// backend PID of its dedicated lock session; the row exists exactly
/// while the locker is running.
pub struct Locker {
    context: Arc<LockerContext>,
    backend_pid: i32,
    worker_priorities: Vec<Option<i16>>,
    state: watch::Receiver<LockerState>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Locker {
    /// Brings a locker to the running state.
    ///
    /// Establishes the dedicated lock session (caller-supplied or detached
    /// from the pool), subscribes to this locker's notification channel,
    /// garbage-collects stale registration rows, registers this locker,
    /// and spawns the workers, the notifier listener, the poller, and the
    /// control loop. Any failure before that point surfaces here and
    /// leaves nothing registered.
    pub async fn start(
        pool: PgPool,
        runner: Arc<dyn JobRunner>,
        mut config: LockerConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let mut lock_conn = match config.connection.take() {
            Some(conn) => conn,
            None => pool.acquire().await?.detach(),
        };
        let backend_pid = db::backend_pid(&mut lock_conn).await?;
        let channel = format!("locker_{backend_pid}");

        let pg_listener = if config.listen {
            let mut pg_listener = PgListener::connect_with(&pool).await?;
            pg_listener.listen(&channel).await?;
            Some(pg_listener)
        } else {
            None
        };

        db::clean_stale_lockers(&mut lock_conn).await?;
        db::register_locker(&mut lock_conn, config.worker_count as i16, config.listen).await?;

        let context = Arc::new(LockerContext {
            job_queue: Arc::new(JobQueue::new(config.maximum_queue_size)),
            registry: LockRegistry::new(),
            lock_conn: tokio::sync::Mutex::new(Some(lock_conn)),
            log_sink: config.log_sink.clone(),
        });

        let (result_tx, result_rx) = result_channel();
        let worker_priorities = config.resolved_worker_priorities();
        let workers: Vec<Worker> = worker_priorities
            .iter()
            .enumerate()
            .map(|(index, ceiling)| {
                Worker::spawn(
                    index,
                    *ceiling,
                    context.job_queue.clone(),
                    result_tx.clone(),
                    runner.clone(),
                    config.on_worker_start.clone(),
                )
            })
            .collect();
        // Workers hold the only senders, so the channel closes when the
        // last worker exits.
        drop(result_tx);

        let shutdown = CancellationToken::new();
        let poll_wake = Arc::new(Notify::new());

        let listener_handle = pg_listener
            .map(|pg_listener| listener::spawn(pg_listener, context.clone(), shutdown.child_token()));
        let poller_handle = poller::spawn(
            context.clone(),
            config.poll_interval,
            poll_wake.clone(),
            shutdown.child_token(),
        );

        context.emit(&LockerEvent::LockerStart {
            listen: config.listen,
            backend_pid,
            poll_interval: config.poll_interval.map(|d| d.as_secs_f64()),
            wait_period: config.wait_period.as_secs_f64(),
            minimum_queue_size: config.minimum_queue_size,
            maximum_queue_size: config.maximum_queue_size,
            worker_priorities: worker_priorities.clone(),
        });
        info!(backend_pid, workers = worker_priorities.len(), "locker running");

        let (state_tx, state_rx) = watch::channel(LockerState::Running);
        let supervisor = Supervisor {
            context: context.clone(),
            workers,
            result_rx,
            listener_handle,
            poller_handle: Some(poller_handle),
            poll_wake,
            minimum_queue_size: config.minimum_queue_size,
            wait_period: config.wait_period,
            shutdown: shutdown.clone(),
            state_tx,
        };
        let handle = tokio::spawn(supervisor.run());

        Ok(Self {
            context,
            backend_pid,
            worker_priorities,
            state: state_rx,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Initiates shutdown without waiting for it. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Initiates shutdown and blocks until the locker is fully stopped.
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.wait_for_stop().await;
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "locker control task panicked");
            }
        }
    }

    /// Blocks until the locker stops, without initiating the stop.
    pub async fn wait_for_stop(&self) {
        let mut state = self.state.clone();
        while *state.borrow() != LockerState::Stopped {
            if state.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn state(&self) -> LockerState {
        *self.state.borrow()
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.context.job_queue
    }

    /// Job IDs whose advisory locks this locker currently holds.
    pub fn held_locks(&self) -> Vec<i64> {
        self.context.registry.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_priorities.len()
    }

    pub fn worker_priorities(&self) -> &[Option<i16>] {
        &self.worker_priorities
    }

    /// Backend PID of the lock session; the locker's external identity.
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }
}

struct Supervisor {
    context: Arc<LockerContext>,
    workers: Vec<Worker>,
    result_rx: ResultReceiver,
    listener_handle: Option<JoinHandle<()>>,
    poller_handle: Option<JoinHandle<()>>,
    poll_wake: Arc<Notify>,
    minimum_queue_size: usize,
    wait_period: Duration,
    shutdown: CancellationToken,
    state_tx: watch::Sender<LockerState>,
}

impl Supervisor {
    async fn run(mut self) {
        self.control_loop().await;
        let _ = self.state_tx.send(LockerState::Draining);
        self.drain().await;
        let _ = self.state_tx.send(LockerState::Stopped);
        debug!("locker stopped");
    }

    /// Reacts to completions while running: release the finished job's
    /// lock and re-poll once the queue drains to the low-water mark. The
    /// idle tick bounds how long the loop sits in one wait.
    async fn control_loop(&mut self) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                finished = self.result_rx.recv() => match finished {
                    Some(finished) => {
                        self.context.release(finished.job_id).await;
                        if self.context.job_queue.size() <= self.minimum_queue_size {
                            self.poll_wake.notify_one();
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(self.wait_period) => {}
            }
        }
    }

    async fn drain(&mut self) {
        // Close the intake paths first: the listener unsubscribes, the
        // poller finishes its cycle and exits.
        self.shutdown.cancel();
        if let Some(handle) = self.listener_handle.take() {
            if let Err(error) = handle.await {
                warn!(%error, "listener task panicked");
            }
        }
        if let Some(handle) = self.poller_handle.take() {
            if let Err(error) = handle.await {
                warn!(%error, "poller task panicked");
            }
        }

        // Hand undelivered work back: whatever never reached a worker gets
        // its lock released now, and blocked workers see the sentinel.
        let drained = self.context.job_queue.stop();
        self.context.release_all(drained).await;

        // In-flight jobs run to completion.
        for worker in self.workers.drain(..) {
            worker.join().await;
        }

        // All senders are gone; whatever is left in the channel is the
        // final set of completions.
        while let Some(finished) = self.result_rx.recv().await {
            self.context.release(finished.job_id).await;
        }

        // The registry should be empty by now; anything remaining would
        // leak a lock, so release it explicitly.
        for job_id in self.context.registry.drain() {
            warn!(job_id, "releasing lock unaccounted for at shutdown");
            self.context.unlock(job_id).await;
        }

        let mut guard = self.context.lock_conn.lock().await;
        if let Some(conn) = guard.as_mut() {
            if let Err(error) = db::deregister_locker(conn).await {
                warn!(%error, "failed to delete locker registration row");
            }
        }
        self.context.emit(&LockerEvent::LockerStop {});
        if let Some(conn) = guard.take() {
            if let Err(error) = conn.close().await {
                warn!(%error, "failed to close lock connection");
            }
        }
    }
}
