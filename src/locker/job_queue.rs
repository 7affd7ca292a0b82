use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::locker::descriptor::JobDescriptor;

/// Outcome of a blocking pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop {
    Job(JobDescriptor),
    Shutdown,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: BTreeSet<JobDescriptor>,
    stopped: bool,
}

/// Bounded, priority-ordered, concurrent container of locked descriptors.
///
/// Pushing past capacity spills the least urgent descriptors back to the
/// caller, which owns releasing their advisory locks. Workers block in
/// `pop` until an eligible descriptor appears or the queue is stopped.
#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_size: usize,
}

impl JobQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_size,
        }
    }

    /// Merges `descriptors` into the queue.
    ///
    /// Returns the descriptors that did not make the cut: the lowest
    /// priority entries once the queue exceeds its capacity, or the whole
    /// input if the queue has been stopped. Either way the caller still
    /// holds their advisory locks and must release them.
    pub fn push(&self, descriptors: impl IntoIterator<Item = JobDescriptor>) -> Vec<JobDescriptor> {
        let rejected = {
            let mut inner = self.inner.lock().unwrap();
            if inner.stopped {
                descriptors.into_iter().collect()
            } else {
                for descriptor in descriptors {
                    inner.jobs.insert(descriptor);
                }
                let mut spilled = Vec::new();
                while inner.jobs.len() > self.max_size {
                    let worst = *inner.jobs.iter().next_back().unwrap();
                    inner.jobs.remove(&worst);
                    spilled.push(worst);
                }
                spilled
            }
        };
        self.notify.notify_waiters();
        rejected
    }

    /// Removes and returns the most urgent descriptor whose priority is
    /// numerically at or below `ceiling` (any priority when `None`).
    ///
    /// Suspends until an eligible descriptor exists. Every unblocked call
    /// returns a distinct descriptor; once the queue is stopped, all
    /// current and future calls return `Pop::Shutdown`.
    pub async fn pop(&self, ceiling: Option<i16>) -> Pop {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(pop) = self.try_pop(ceiling) {
                return pop;
            }
            notified.await;
        }
    }

    fn try_pop(&self, ceiling: Option<i16>) -> Option<Pop> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Some(Pop::Shutdown);
        }
        // The set is ordered ascending, so if the head exceeds the ceiling
        // every other entry does too.
        let head = inner.jobs.iter().next().copied()?;
        if ceiling.is_some_and(|max| head.priority > max) {
            return None;
        }
        inner.jobs.remove(&head);
        Some(Pop::Job(head))
    }

    /// Priority of the least urgent descriptor currently queued; the
    /// threshold a new candidate must beat once the queue is full.
    pub fn lowest_priority(&self) -> Option<i16> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.iter().next_back().map(|d| d.priority)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    /// Remaining capacity.
    pub fn space(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        self.max_size.saturating_sub(inner.jobs.len())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Transitions to the shutdown state and hands the remaining
    /// descriptors back to the caller for lock release. Blocked and future
    /// `pop`s observe `Pop::Shutdown`.
    pub fn stop(&self) -> Vec<JobDescriptor> {
        let drained = {
            let mut inner = self.inner.lock().unwrap();
            inner.stopped = true;
            std::mem::take(&mut inner.jobs).into_iter().collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }

    /// Ordered snapshot of the queued descriptors.
    pub fn jobs(&self) -> Vec<JobDescriptor> {
        self.inner.lock().unwrap().jobs.iter().copied().collect()
    }

    /// Queued job IDs in queue order.
    pub fn job_ids(&self) -> Vec<i64> {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .iter()
            .map(|d| d.job_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn descriptor(priority: i16, job_id: i64) -> JobDescriptor {
        JobDescriptor {
            priority,
            run_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            job_id,
        }
    }

    #[tokio::test]
    async fn pop_returns_most_urgent_first() {
        let queue = JobQueue::new(8);
        queue.push([descriptor(5, 1), descriptor(1, 2), descriptor(3, 3)]);

        assert_eq!(queue.pop(None).await, Pop::Job(descriptor(1, 2)));
        assert_eq!(queue.pop(None).await, Pop::Job(descriptor(3, 3)));
        assert_eq!(queue.pop(None).await, Pop::Job(descriptor(5, 1)));
    }

    #[tokio::test]
    async fn push_spills_lowest_priority_beyond_capacity() {
        let queue = JobQueue::new(2);
        let spilled = queue.push([descriptor(5, 1), descriptor(5, 2)]);
        assert!(spilled.is_empty());

        let spilled = queue.push([descriptor(2, 3)]);
        assert_eq!(spilled, vec![descriptor(5, 2)]);
        assert_eq!(queue.job_ids(), vec![3, 1]);
    }

    #[tokio::test]
    async fn push_can_spill_its_own_input() {
        let queue = JobQueue::new(2);
        queue.push([descriptor(1, 1), descriptor(2, 2)]);

        let spilled = queue.push([descriptor(9, 3)]);
        assert_eq!(spilled, vec![descriptor(9, 3)]);
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn pop_respects_priority_ceiling() {
        let queue = Arc::new(JobQueue::new(8));
        queue.push([descriptor(30, 1)]);

        // A ceiling-10 worker must not take a priority-30 job.
        let strict = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Some(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!strict.is_finished());

        // An unbounded pop takes it immediately.
        assert_eq!(queue.pop(None).await, Pop::Job(descriptor(30, 1)));

        queue.push([descriptor(5, 2)]);
        assert_eq!(strict.await.unwrap(), Pop::Job(descriptor(5, 2)));
    }

    #[tokio::test]
    async fn blocked_pops_each_get_a_distinct_descriptor() {
        let queue = Arc::new(JobQueue::new(8));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.pop(None).await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.push([descriptor(1, 1), descriptor(2, 2), descriptor(3, 3)]);

        let mut ids = Vec::new();
        for handle in handles {
            match timeout(Duration::from_secs(1), handle).await.unwrap().unwrap() {
                Pop::Job(d) => ids.push(d.job_id),
                Pop::Shutdown => panic!("queue was not stopped"),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stop_unblocks_pops_with_the_sentinel() {
        let queue = Arc::new(JobQueue::new(8));
        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.push([descriptor(4, 9)]);
        let drained = queue.stop();

        // The racing pop may have taken the descriptor before stop drained
        // the queue; between them they account for exactly one copy.
        let popped = timeout(Duration::from_secs(1), blocked).await.unwrap().unwrap();
        match popped {
            Pop::Job(d) => {
                assert_eq!(d.job_id, 9);
                assert!(drained.is_empty());
            }
            Pop::Shutdown => assert_eq!(drained, vec![descriptor(4, 9)]),
        }

        assert_eq!(queue.pop(None).await, Pop::Shutdown);
    }

    #[tokio::test]
    async fn push_after_stop_returns_everything() {
        let queue = JobQueue::new(8);
        queue.stop();
        let rejected = queue.push([descriptor(1, 1), descriptor(2, 2)]);
        assert_eq!(rejected.len(), 2);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn threshold_and_space_track_contents() {
        let queue = JobQueue::new(3);
        assert_eq!(queue.lowest_priority(), None);
        assert_eq!(queue.space(), 3);

        queue.push([descriptor(2, 1), descriptor(8, 2)]);
        assert_eq!(queue.lowest_priority(), Some(8));
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.space(), 1);
    }
}
