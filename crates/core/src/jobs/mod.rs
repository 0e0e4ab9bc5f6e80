//! Deferred jobs: the scheduling seam and its SQLite-backed queue.

mod scheduler;
mod sqlite_queue;
mod types;

pub use scheduler::JobScheduler;
pub use sqlite_queue::{SqliteJobQueue, DEFAULT_MAX_ATTEMPTS};
pub use types::{Job, JobId, JobKind, JobRequest, JobState, QueueStats, SchedulerError};
