pub mod coordinator;
pub mod descriptor;
pub mod job_queue;
pub mod registry;
pub mod result_queue;
pub mod worker;

pub(crate) mod context;
pub(crate) mod listener;
pub(crate) mod poller;

pub use coordinator::{Locker, LockerState};
pub use descriptor::JobDescriptor;
pub use job_queue::{JobQueue, Pop};
pub use registry::LockRegistry;
pub use result_queue::JobFinished;
pub use worker::{JobRunner, RunnerFn, Worker, WorkerStartHook};
