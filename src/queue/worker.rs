//! Worker pool for the job queue.
//!
//! Workers share the queue's submission feed and drive each job to a
//! terminal status: bounded retries with exponential backoff, then
//! `Completed` or `Failed` in the retained store. Shutdown is signalled
//! over a broadcast channel; workers finish their current job first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::queue::job::JobHandler;
use crate::queue::queue::JobQueue;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub num_workers: usize,
}

impl WorkerPoolConfig {
    /// Set the number of workers.
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        // One worker: jobs run one at a time unless scaled explicitly.
        Self { num_workers: 1 }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub attempts_retried: u64,
}

/// Shared atomic counters behind `PoolStats`.
#[derive(Debug, Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    attempts_retried: AtomicU64,
}

impl SharedPoolStats {
    fn to_pool_stats(&self) -> PoolStats {
        PoolStats {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            attempts_retried: self.attempts_retried.load(Ordering::Relaxed),
        }
    }
}

/// Pool of workers consuming the queue feed.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    stats: Arc<SharedPoolStats>,
    shutdown_tx: broadcast::Sender<()>,
    feed: Option<Arc<Mutex<mpsc::Receiver<Uuid>>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool over the queue's feed. Call `start` to spawn workers.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        feed: mpsc::Receiver<Uuid>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            queue,
            handler,
            stats: Arc::new(SharedPoolStats::default()),
            shutdown_tx,
            feed: Some(Arc::new(Mutex::new(feed))),
            handles: Vec::new(),
        }
    }

    /// Spawn the configured number of workers.
    pub fn start(&mut self) {
        let Some(feed) = self.feed.take() else {
            return; // already started
        };

        tracing::info!(workers = self.config.num_workers, "starting worker pool");

        for worker_id in 0..self.config.num_workers {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&self.queue),
                handler: Arc::clone(&self.handler),
                stats: Arc::clone(&self.stats),
                feed: Arc::clone(&feed),
                shutdown_rx: self.shutdown_tx.subscribe(),
            };
            self.handles.push(tokio::spawn(worker.run()));
        }
    }

    /// Get a snapshot of pool counters.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats()
    }

    /// Signal shutdown and wait for all workers to finish.
    pub async fn shutdown(&mut self) {
        // No receivers just means no workers were started.
        let _ = self.shutdown_tx.send(());

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker task panicked during shutdown");
            }
        }

        tracing::info!("worker pool stopped");
    }
}

/// A single worker loop.
struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    stats: Arc<SharedPoolStats>,
    feed: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!(worker = self.id, "worker started");

        let feed = Arc::clone(&self.feed);
        loop {
            let job_id = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    tracing::debug!(worker = self.id, "worker received shutdown");
                    break;
                }
                received = async { feed.lock().await.recv().await } => {
                    match received {
                        Some(id) => id,
                        None => break, // queue dropped
                    }
                }
            };

            self.process(job_id).await;
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    /// Drive one job to a terminal status.
    async fn process(&self, job_id: Uuid) {
        let Some(mut job) = self.queue.load_job(job_id).await else {
            tracing::warn!(worker = self.id, %job_id, "job vanished before execution");
            return;
        };

        loop {
            job.increment_attempts();
            self.queue.mark_active(job_id, job.attempts).await;

            tracing::debug!(
                worker = self.id,
                %job_id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                "executing job"
            );

            match self.handler.handle(&job).await {
                Ok(output) => {
                    self.queue.mark_completed(job_id, output).await;
                    self.stats.jobs_completed.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(worker = self.id, %job_id, attempts = job.attempts, "job completed");
                    return;
                }
                Err(e) => {
                    if job.should_retry() {
                        let delay = job.backoff.delay_after(job.attempts);
                        tracing::warn!(
                            worker = self.id,
                            %job_id,
                            attempt = job.attempts,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "job attempt failed, will retry"
                        );
                        self.queue.mark_retrying(job_id, &e.to_string()).await;
                        self.stats.attempts_retried.fetch_add(1, Ordering::Relaxed);
                        sleep(delay).await;
                    } else {
                        self.queue.mark_failed(job_id, &e.to_string()).await;
                        self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            worker = self.id,
                            %job_id,
                            attempts = job.attempts,
                            error = %e,
                            "job failed permanently"
                        );
                        return;
                    }
                }
            }
        }
    }
}
