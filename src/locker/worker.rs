use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::locker::descriptor::JobDescriptor;
use crate::locker::job_queue::{JobQueue, Pop};
use crate::locker::result_queue::{JobFinished, ResultSender};

/// The job-invocation callback.
///
/// Implementations re-read the job row under the inherited advisory lock
/// and run the job body, including whatever retry or burial policy applies
/// on failure. Returning `Err` only affects logging; the worker reports
/// completion either way and the coordinator releases the lock.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: JobDescriptor) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can serve as a [`JobRunner`].
pub struct RunnerFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> JobRunner for RunnerFn<F>
where
    F: Fn(JobDescriptor) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, job: JobDescriptor) -> anyhow::Result<()> {
        (self.0)(job).await
    }
}

/// Hook invoked once per worker, from the worker's own task, with the
/// worker's index.
pub type WorkerStartHook = Arc<dyn Fn(usize) + Send + Sync>;

/// A single worker task: pops descriptors at or below its priority
/// ceiling, invokes the job callback, and signals the result queue. Exits
/// when the job queue hands it the shutdown sentinel.
pub struct Worker {
    index: usize,
    priority: Option<i16>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        index: usize,
        priority: Option<i16>,
        job_queue: Arc<JobQueue>,
        results: ResultSender,
        runner: Arc<dyn JobRunner>,
        on_start: Option<WorkerStartHook>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            if let Some(hook) = on_start {
                hook(index);
            }
            loop {
                match job_queue.pop(priority).await {
                    Pop::Job(job) => {
                        if let Err(error) = runner.run(job).await {
                            warn!(
                                worker = index,
                                job_id = job.job_id,
                                error = %error,
                                "job execution failed"
                            );
                        }
                        if results.send(JobFinished { job_id: job.job_id }).is_err() {
                            // Coordinator is gone; nothing left to report to.
                            break;
                        }
                    }
                    Pop::Shutdown => break,
                }
            }
            debug!(worker = index, "worker exited");
        });

        Self {
            index,
            priority,
            handle: Some(handle),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Priority ceiling, `None` meaning any priority.
    pub fn priority(&self) -> Option<i16> {
        self.priority
    }

    pub(crate) async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                warn!(worker = self.index, error = %error, "worker task panicked");
            }
        }
    }
}
