//! Asynchronous job queue.
//!
//! Submission returns immediately with a job id; workers execute jobs in
//! the background with bounded retries and exponential backoff. Terminal
//! jobs are retained for status lookup.

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{BackoffPolicy, Job, JobError, JobHandler, JobSnapshot, JobStatus};
pub use queue::{JobHandle, JobQueue, QueueError, QueueStats};
pub use worker::{PoolStats, WorkerPool, WorkerPoolConfig};
