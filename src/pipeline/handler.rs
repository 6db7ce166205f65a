//! Queue handler that runs pipelines.
//!
//! Bridges the job queue to the coordinator: the job payload is a
//! `TaskInput`, the job id doubles as the task id so callers can
//! subscribe to progress events before submitting.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::pipeline::coordinator::PipelineCoordinator;
use crate::pipeline::types::{RunStatus, TaskInput};
use crate::queue::job::{Job, JobError, JobHandler};

/// Executes each job as one pipeline run.
pub struct AnalysisJobHandler {
    coordinator: Arc<PipelineCoordinator>,
}

impl AnalysisJobHandler {
    /// Create a handler over the given coordinator.
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl JobHandler for AnalysisJobHandler {
    async fn handle(&self, job: &Job) -> Result<Value, JobError> {
        let input: TaskInput = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::new(format!("invalid job payload: {}", e)))?;

        let report = self
            .coordinator
            .run_task(job.id, input)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;

        // A failed run counts as a failed attempt so queue retry applies.
        if report.status == RunStatus::Failed {
            return Err(JobError::new(format!(
                "pipeline failed at: {}",
                report.failed_stages().join(", ")
            )));
        }

        serde_json::to_value(&report)
            .map_err(|e| JobError::new(format!("report serialization failed: {}", e)))
    }
}
