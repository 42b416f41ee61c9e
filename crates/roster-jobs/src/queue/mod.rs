//! Durable job queue
//!
//! Jobs are rows in SQLite; workers claim them through atomic leases and
//! report outcomes back through the store. Lifecycle transitions fan out on
//! an in-process broadcast channel that the notifier bridge consumes.

pub mod events;
pub mod job;
pub mod store;

pub use events::{QueueEvent, QueueEventKind, QueueEvents, DEFAULT_EVENT_CAPACITY};
pub use job::{
    backoff_delay_secs, CreateJobPayload, EnqueueOptions, ImportCheckpoint, ImportJobPayload, Job,
    JobProgress, JobState, LeasedJob, CREATE_JOB_TYPE, DEFAULT_BACKOFF_BASE_SECS,
    DEFAULT_MAX_ATTEMPTS, EMPLOYEE_QUEUE, IMPORT_JOB_TYPE, IMPORT_QUEUE,
};
pub use store::{FailOutcome, JobStore};
