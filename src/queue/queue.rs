//! In-process job store and submission channel.
//!
//! The queue pairs a retained record map with an mpsc feed to workers.
//! Records are never evicted: terminal jobs stay queryable by id so
//! callers can fetch results after the fact. Durable storage is an
//! external concern layered on top of the snapshots this queue exposes.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::queue::job::{Job, JobSnapshot, JobStatus};

/// Default capacity of the submission channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is shut down; no workers are receiving")]
    Closed,
}

/// Handle to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Returns whether any job is still waiting or running.
    pub fn has_pending(&self) -> bool {
        self.waiting > 0 || self.active > 0
    }
}

/// Stored state of a job.
#[derive(Debug, Clone)]
struct JobRecord {
    job: Job,
    status: JobStatus,
    output: Option<Value>,
    last_error: Option<String>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.job.id,
            status: self.status,
            attempts: self.job.attempts,
            max_attempts: self.job.max_attempts,
            payload: self.job.payload.clone(),
            output: self.output.clone(),
            last_error: self.last_error.clone(),
            created_at: self.job.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Job queue with retained results.
pub struct JobQueue {
    store: Mutex<HashMap<Uuid, JobRecord>>,
    tx: mpsc::Sender<Uuid>,
}

impl JobQueue {
    /// Create a queue and the worker-side feed of job ids.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Uuid>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a queue with an explicit submission channel capacity.
    pub fn with_capacity(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(Self {
            store: Mutex::new(HashMap::new()),
            tx,
        });
        (queue, rx)
    }

    /// Enqueue a payload as a job with default retry settings.
    pub async fn enqueue(&self, payload: Value) -> Result<JobHandle, QueueError> {
        self.enqueue_job(Job::new(payload)).await
    }

    /// Enqueue a fully configured job.
    pub async fn enqueue_job(&self, job: Job) -> Result<JobHandle, QueueError> {
        let id = job.id;

        {
            let mut store = self.store.lock().await;
            store.insert(
                id,
                JobRecord {
                    job,
                    status: JobStatus::Waiting,
                    output: None,
                    last_error: None,
                    completed_at: None,
                },
            );
        }

        if self.tx.send(id).await.is_err() {
            // No worker will ever pick it up; remove the orphan record.
            self.store.lock().await.remove(&id);
            return Err(QueueError::Closed);
        }

        tracing::debug!(job_id = %id, "job enqueued");
        Ok(JobHandle { id })
    }

    /// Look up the current state of a job by id.
    ///
    /// Terminal jobs remain queryable; `None` means the id was never
    /// enqueued here.
    pub async fn status(&self, id: Uuid) -> Option<JobSnapshot> {
        self.store.lock().await.get(&id).map(JobRecord::snapshot)
    }

    /// Aggregate counters over all retained jobs.
    pub async fn stats(&self) -> QueueStats {
        let store = self.store.lock().await;
        let mut stats = QueueStats::default();
        for record in store.values() {
            match record.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Load a copy of the job for execution.
    pub(crate) async fn load_job(&self, id: Uuid) -> Option<Job> {
        self.store.lock().await.get(&id).map(|r| r.job.clone())
    }

    /// Mark the job active on its nth attempt.
    pub(crate) async fn mark_active(&self, id: Uuid, attempts: u32) {
        let mut store = self.store.lock().await;
        if let Some(record) = store.get_mut(&id) {
            record.status = JobStatus::Active;
            record.job.attempts = attempts;
        }
    }

    /// Record a failed attempt that will be retried.
    pub(crate) async fn mark_retrying(&self, id: Uuid, error: &str) {
        let mut store = self.store.lock().await;
        if let Some(record) = store.get_mut(&id) {
            record.status = JobStatus::Waiting;
            record.last_error = Some(error.to_string());
        }
    }

    /// Mark the job completed with its output.
    pub(crate) async fn mark_completed(&self, id: Uuid, output: Value) {
        let mut store = self.store.lock().await;
        if let Some(record) = store.get_mut(&id) {
            record.status = JobStatus::Completed;
            record.output = Some(output);
            record.completed_at = Some(chrono::Utc::now());
        }
    }

    /// Mark the job permanently failed.
    pub(crate) async fn mark_failed(&self, id: Uuid, error: &str) {
        let mut store = self.store.lock().await;
        if let Some(record) = store.get_mut(&id) {
            record.status = JobStatus::Failed;
            record.last_error = Some(error.to_string());
            record.completed_at = Some(chrono::Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_status() {
        let (queue, mut rx) = JobQueue::new();

        let handle = queue
            .enqueue(json!({"idea": "robot barista"}))
            .await
            .expect("enqueue should succeed");

        let snapshot = queue.status(handle.id).await.expect("job should exist");
        assert_eq!(snapshot.status, JobStatus::Waiting);
        assert_eq!(snapshot.payload["idea"], "robot barista");
        assert_eq!(snapshot.attempts, 0);

        assert_eq!(rx.recv().await, Some(handle.id));
    }

    #[tokio::test]
    async fn test_unknown_id_returns_none() {
        let (queue, _rx) = JobQueue::new();
        assert!(queue.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_after_workers_gone_fails() {
        let (queue, rx) = JobQueue::new();
        drop(rx);

        let result = queue.enqueue(json!({})).await;
        assert!(matches!(result, Err(QueueError::Closed)));
        assert_eq!(queue.stats().await, QueueStats::default());
    }

    #[tokio::test]
    async fn test_terminal_jobs_retained() {
        let (queue, _rx) = JobQueue::new();

        let handle = queue.enqueue(json!({})).await.expect("enqueue");
        queue.mark_active(handle.id, 1).await;
        queue.mark_completed(handle.id, json!({"report": "ok"})).await;

        let snapshot = queue.status(handle.id).await.expect("still queryable");
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.output, Some(json!({"report": "ok"})));
        assert!(snapshot.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_reflect_statuses() {
        let (queue, _rx) = JobQueue::new();

        let a = queue.enqueue(json!({})).await.expect("enqueue");
        let b = queue.enqueue(json!({})).await.expect("enqueue");
        let c = queue.enqueue(json!({})).await.expect("enqueue");

        queue.mark_active(a.id, 1).await;
        queue.mark_completed(a.id, json!({})).await;
        queue.mark_active(b.id, 1).await;
        queue.mark_failed(b.id, "boom").await;
        queue.mark_active(c.id, 1).await;

        let stats = queue.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.waiting, 0);
        assert!(stats.has_pending());
    }
}
