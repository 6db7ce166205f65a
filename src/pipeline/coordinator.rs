//! Pipeline coordinator.
//!
//! Runs a roster of stage agents in order, feeding each stage the
//! accumulated output of the stages before it. Failure propagation is a
//! configuration choice: hard-stop pipelines halt at the first stage
//! failure, continue-on-error pipelines mark the failure and keep going so
//! a partial report is still produced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::agents::StageAgent;
use crate::events::{AgentEvent, CompletionEvent, EventBroadcaster};
use crate::pipeline::types::{
    humanize_stage_name, FinalReport, RunStatus, StageResult, TaskInput,
};

/// How a pipeline reacts to a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Halt the run at the first failed stage.
    HardStop,
    /// Record the failure and run the remaining stages.
    ContinueOnError,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Pipeline name carried into reports and logs.
    pub pipeline_name: String,
    /// Failure propagation mode.
    pub failure_mode: FailureMode,
}

impl CoordinatorConfig {
    /// Create a configuration with the given name and mode.
    pub fn new(pipeline_name: impl Into<String>, failure_mode: FailureMode) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            failure_mode,
        }
    }
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("invalid task input: {0}")]
    InvalidInput(String),
}

/// Sequences stage agents and reports progress.
pub struct PipelineCoordinator {
    stages: Vec<Arc<dyn StageAgent>>,
    broadcaster: Arc<EventBroadcaster>,
    config: CoordinatorConfig,
    cancelled: Arc<AtomicBool>,
}

impl PipelineCoordinator {
    /// Create a coordinator over the given stage roster.
    pub fn new(
        stages: Vec<Arc<dyn StageAgent>>,
        broadcaster: Arc<EventBroadcaster>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            stages,
            broadcaster,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the cancellation flag.
    ///
    /// Setting the flag stops the run before the next stage starts; the
    /// stage in flight is allowed to finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Get the pipeline name.
    pub fn pipeline_name(&self) -> &str {
        &self.config.pipeline_name
    }

    /// Run the pipeline under a fresh task id.
    pub async fn run(&self, input: TaskInput) -> Result<FinalReport, OrchestrationError> {
        self.run_task(Uuid::new_v4(), input).await
    }

    /// Run the pipeline under a caller-chosen task id.
    ///
    /// Using a known id lets callers subscribe to progress events before
    /// the run starts.
    pub async fn run_task(
        &self,
        task_id: Uuid,
        input: TaskInput,
    ) -> Result<FinalReport, OrchestrationError> {
        input
            .validate()
            .map_err(OrchestrationError::InvalidInput)?;

        let started_at = chrono::Utc::now();
        tracing::info!(
            pipeline = %self.config.pipeline_name,
            %task_id,
            stages = self.stages.len(),
            "pipeline run started"
        );

        self.broadcaster.publish(AgentEvent::new(
            task_id,
            "pipeline",
            "start",
            format!("{} started", self.config.pipeline_name),
        ));

        let mut results: Vec<StageResult> = Vec::new();
        let mut run_failed = false;
        let mut run_cancelled = false;

        for stage in &self.stages {
            if self.cancelled.load(Ordering::SeqCst) {
                tracing::warn!(%task_id, "run cancelled, skipping remaining stages");
                run_failed = true;
                run_cancelled = true;
                break;
            }

            let context = build_context(&results);
            let display_name = humanize_stage_name(stage.name());

            match stage.invoke(&input, &context).await {
                Ok(output) => {
                    tracing::info!(%task_id, stage = stage.name(), attempts = output.attempts, "stage completed");
                    let result =
                        StageResult::completed(stage.name(), output.value, output.attempts);

                    self.broadcaster.publish(
                        AgentEvent::new(
                            task_id,
                            stage.name(),
                            "complete",
                            format!("{} finished", display_name),
                        )
                        .with_output_ref(stage.name()),
                    );
                    self.broadcaster.publish_completion(CompletionEvent::Stage {
                        task_id,
                        agent_id: stage.name().to_string(),
                        result: result.clone(),
                    });

                    results.push(result);
                }
                Err(e) => {
                    tracing::warn!(%task_id, stage = stage.name(), error = %e, "stage failed");
                    let result = StageResult::failed(stage.name(), e.to_string(), e.attempts());

                    self.broadcaster.publish(AgentEvent::new(
                        task_id,
                        stage.name(),
                        "error",
                        format!("{} failed: {}", display_name, e),
                    ));
                    self.broadcaster.publish_completion(CompletionEvent::Stage {
                        task_id,
                        agent_id: stage.name().to_string(),
                        result: result.clone(),
                    });

                    results.push(result);

                    if self.config.failure_mode == FailureMode::HardStop {
                        run_failed = true;
                        break;
                    }
                }
            }
        }

        let status = if run_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let step = match status {
            RunStatus::Completed => "complete",
            RunStatus::Failed => "error",
        };
        // The terminal event is emitted exactly once per run; cancellation
        // is folded into it rather than published separately.
        let message = if run_cancelled {
            format!("{} cancelled", self.config.pipeline_name)
        } else {
            format!("{} {}", self.config.pipeline_name, status)
        };
        self.broadcaster
            .publish(AgentEvent::new(task_id, "pipeline", step, message));
        self.broadcaster
            .publish_completion(CompletionEvent::Pipeline {
                task_id,
                status,
                results: results.clone(),
            });

        tracing::info!(
            pipeline = %self.config.pipeline_name,
            %task_id,
            %status,
            stages_run = results.len(),
            "pipeline run finished"
        );

        Ok(FinalReport {
            task_id,
            pipeline: self.config.pipeline_name.clone(),
            status,
            input,
            results,
            started_at,
            completed_at: chrono::Utc::now(),
        })
    }
}

/// Render completed prior-stage outputs as context for the next stage.
///
/// Failed stages are omitted; the next stage sees only trustworthy output.
fn build_context(results: &[StageResult]) -> String {
    let mut sections = Vec::new();

    for result in results.iter().filter(|r| r.is_completed()) {
        if let Some(output) = &result.output {
            let rendered = serde_json::to_string_pretty(output).unwrap_or_default();
            sections.push(format!(
                "## {}\n{}",
                humanize_stage_name(&result.stage_name),
                rendered
            ));
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{StageError, StageOutput};
    use crate::llm::structured::{FailureKind, InvokeFailure};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// A stage with a scripted outcome that records the context it saw.
    struct ScriptedStage {
        name: String,
        succeed: bool,
        calls: AtomicUsize,
        seen_context: Mutex<Vec<String>>,
    }

    impl ScriptedStage {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                succeed: true,
                calls: AtomicUsize::new(0),
                seen_context: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                succeed: false,
                calls: AtomicUsize::new(0),
                seen_context: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageAgent for ScriptedStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(
            &self,
            _input: &TaskInput,
            context: &str,
        ) -> Result<StageOutput, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_context.lock().unwrap().push(context.to_string());

            if self.succeed {
                Ok(StageOutput {
                    value: json!({"stage": self.name}),
                    attempts: 1,
                })
            } else {
                Err(StageError::Invoke(InvokeFailure {
                    kind: FailureKind::Validation,
                    attempts: 3,
                    last_error: "scripted failure".to_string(),
                }))
            }
        }
    }

    fn coordinator(
        stages: Vec<Arc<dyn StageAgent>>,
        mode: FailureMode,
    ) -> (PipelineCoordinator, Arc<EventBroadcaster>) {
        let broadcaster = Arc::new(EventBroadcaster::default());
        let coordinator = PipelineCoordinator::new(
            stages,
            Arc::clone(&broadcaster),
            CoordinatorConfig::new("test_pipeline", mode),
        );
        (coordinator, broadcaster)
    }

    #[tokio::test]
    async fn test_hard_stop_halts_at_first_failure() {
        let first = ScriptedStage::ok("first");
        let second = ScriptedStage::failing("second");
        let third = ScriptedStage::ok("third");

        let (coordinator, _) = coordinator(
            vec![
                Arc::clone(&first) as Arc<dyn StageAgent>,
                Arc::clone(&second) as Arc<dyn StageAgent>,
                Arc::clone(&third) as Arc<dyn StageAgent>,
            ],
            FailureMode::HardStop,
        );

        let report = coordinator
            .run(TaskInput::new("an idea"))
            .await
            .expect("run should produce a report");

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failed_stages(), vec!["second"]);
        assert_eq!(third.call_count(), 0, "stage after failure must not run");
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_all_stages() {
        let first = ScriptedStage::ok("first");
        let second = ScriptedStage::failing("second");
        let third = ScriptedStage::ok("third");

        let (coordinator, _) = coordinator(
            vec![
                Arc::clone(&first) as Arc<dyn StageAgent>,
                Arc::clone(&second) as Arc<dyn StageAgent>,
                Arc::clone(&third) as Arc<dyn StageAgent>,
            ],
            FailureMode::ContinueOnError,
        );

        let report = coordinator
            .run(TaskInput::new("an idea"))
            .await
            .expect("run should produce a report");

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed_stages(), vec!["second"]);
        assert_eq!(third.call_count(), 1);
    }

    #[tokio::test]
    async fn test_context_accumulates_completed_outputs_only() {
        let first = ScriptedStage::ok("normalize");
        let second = ScriptedStage::failing("search");
        let third = ScriptedStage::ok("size");

        let (coordinator, _) = coordinator(
            vec![
                Arc::clone(&first) as Arc<dyn StageAgent>,
                Arc::clone(&second) as Arc<dyn StageAgent>,
                Arc::clone(&third) as Arc<dyn StageAgent>,
            ],
            FailureMode::ContinueOnError,
        );

        coordinator
            .run(TaskInput::new("an idea"))
            .await
            .expect("run should produce a report");

        let first_context = first.seen_context.lock().unwrap()[0].clone();
        assert!(first_context.is_empty());

        let third_context = third.seen_context.lock().unwrap()[0].clone();
        assert!(third_context.contains("## Normalize"));
        assert!(
            !third_context.contains("## Search"),
            "failed stage output must not appear in context"
        );
    }

    #[tokio::test]
    async fn test_event_order_on_clean_run() {
        let stages: Vec<Arc<dyn StageAgent>> = vec![
            ScriptedStage::ok("one"),
            ScriptedStage::ok("two"),
            ScriptedStage::ok("three"),
        ];
        let (coordinator, broadcaster) = coordinator(stages, FailureMode::HardStop);

        let task_id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(task_id);

        coordinator
            .run_task(task_id, TaskInput::new("an idea"))
            .await
            .expect("run should succeed");

        let mut observed = Vec::new();
        let mut timestamps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            observed.push((event.agent_id, event.step));
            timestamps.push(event.timestamp);
        }

        assert_eq!(
            observed,
            vec![
                ("pipeline".to_string(), "start".to_string()),
                ("one".to_string(), "complete".to_string()),
                ("two".to_string(), "complete".to_string()),
                ("three".to_string(), "complete".to_string()),
                ("pipeline".to_string(), "complete".to_string()),
            ]
        );
        assert!(
            timestamps.windows(2).all(|pair| pair[0] <= pair[1]),
            "event timestamps must be non-decreasing"
        );
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_stages() {
        let first = ScriptedStage::ok("first");
        let (coordinator, broadcaster) = coordinator(
            vec![Arc::clone(&first) as Arc<dyn StageAgent>],
            FailureMode::HardStop,
        );

        coordinator.cancel_flag().store(true, Ordering::SeqCst);

        let task_id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(task_id);

        let report = coordinator
            .run_task(task_id, TaskInput::new("an idea"))
            .await
            .expect("cancelled run still produces a report");

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.results.is_empty());
        assert_eq!(first.call_count(), 0);

        let mut observed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            observed.push((event.agent_id, event.step, event.message));
        }
        assert_eq!(observed.len(), 2, "start plus exactly one terminal event");
        assert_eq!(observed[0].1, "start");
        assert_eq!(observed[1].1, "error");
        assert!(observed[1].2.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_any_stage() {
        let first = ScriptedStage::ok("first");
        let (coordinator, broadcaster) = coordinator(
            vec![Arc::clone(&first) as Arc<dyn StageAgent>],
            FailureMode::HardStop,
        );

        let task_id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(task_id);

        let result = coordinator.run_task(task_id, TaskInput::new("   ")).await;
        assert!(matches!(
            result,
            Err(OrchestrationError::InvalidInput(_))
        ));
        assert_eq!(first.call_count(), 0);
        assert!(rx.try_recv().is_err(), "no events for a rejected run");
    }

    #[tokio::test]
    async fn test_pipeline_completion_broadcast_carries_results() {
        let stages: Vec<Arc<dyn StageAgent>> =
            vec![ScriptedStage::ok("one"), ScriptedStage::failing("two")];
        let (coordinator, broadcaster) = coordinator(stages, FailureMode::ContinueOnError);

        let task_id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe_completions(task_id);

        coordinator
            .run_task(task_id, TaskInput::new("an idea"))
            .await
            .expect("run should produce a report");

        let mut pipeline_completion = None;
        while let Ok(event) = rx.try_recv() {
            if let CompletionEvent::Pipeline { status, results, .. } = event {
                pipeline_completion = Some((status, results));
            }
        }

        let (status, results) =
            pipeline_completion.expect("pipeline completion should be broadcast");
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(results.len(), 2);
    }
}
