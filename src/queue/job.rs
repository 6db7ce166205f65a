//! Job definitions for the analysis queue.
//!
//! A job wraps an arbitrary JSON payload with retry bookkeeping. Workers
//! interpret the payload through a `JobHandler`; the queue itself never
//! looks inside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Default maximum number of attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff between retry attempts.
///
/// The delay after attempt `n` is `base * factor^(n-1)`, so the default
/// policy yields 5s, 10s, 20s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds.
    pub base_ms: u64,
    /// Multiplier applied per subsequent attempt.
    pub factor: u32,
}

impl BackoffPolicy {
    /// Create a policy with the given base delay and factor.
    pub fn new(base: Duration, factor: u32) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            factor: factor.max(1),
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_ms.saturating_mul(u64::from(self.factor).pow(exponent)))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 5_000,
            factor: 2,
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, also used as the task id for pipeline jobs.
    pub id: Uuid,
    /// Opaque payload interpreted by the handler.
    pub payload: Value,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Number of times this job has been attempted.
    pub attempts: u32,
    /// Maximum number of attempts before the job fails permanently.
    pub max_attempts: u32,
    /// Retry backoff policy.
    pub backoff: BackoffPolicy,
}

impl Job {
    /// Create a job with default retry settings.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Increment the attempt counter. Called before each execution.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Returns whether the job should be retried after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Returns the number of remaining attempts.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued, not yet picked up (or waiting between retries).
    Waiting,
    /// A worker is executing it.
    Active,
    /// Finished successfully.
    Completed,
    /// Exhausted all attempts.
    Failed,
}

impl JobStatus {
    /// Returns whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error produced by a job handler.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    /// Create a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Executes the payload of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one attempt of the job, returning its output on success.
    async fn handle(&self, job: &Job) -> Result<Value, JobError>;
}

/// Point-in-time view of a job's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub payload: Value,
    /// Handler output, present once the job completed.
    pub output: Option<Value>,
    /// Most recent failure message, if any attempt failed.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}
