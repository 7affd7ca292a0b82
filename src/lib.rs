pub mod config;
pub mod db;
pub mod events;
pub mod locker;

pub use config::{
    LockerConfig, DEFAULT_MAXIMUM_QUEUE_SIZE, DEFAULT_MINIMUM_QUEUE_SIZE, DEFAULT_WORKER_COUNT,
    DEFAULT_WORKER_PRIORITIES,
};
pub use events::{LockerEvent, LogSink, MemorySink, TracingSink};
pub use locker::{
    JobDescriptor, JobFinished, JobQueue, JobRunner, Locker, LockerState, Pop, RunnerFn, Worker,
    WorkerStartHook,
};
