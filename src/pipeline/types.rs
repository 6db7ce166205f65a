//! Core pipeline data types.
//!
//! This module defines the types that flow through a pipeline run:
//!
//! - `TaskInput`: the idea submitted for analysis
//! - `StageResult`: outcome of a single stage
//! - `FinalReport`: assembled outcome of a full run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Upper bound on submitted idea text, in characters.
const MAX_IDEA_CHARS: usize = 8_000;

/// An idea submitted for analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInput {
    /// Free-form description of the idea.
    pub idea: String,
    /// Optional short title.
    #[serde(default)]
    pub title: Option<String>,
    /// Optional caller-supplied metadata, passed through to the report.
    #[serde(default)]
    pub metadata: Value,
}

impl TaskInput {
    /// Create a new input from idea text.
    pub fn new(idea: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            title: None,
            metadata: Value::Null,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set caller metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check that the input is runnable.
    ///
    /// The idea text must be non-blank and within the size cap.
    pub fn validate(&self) -> Result<(), String> {
        let trimmed = self.idea.trim();
        if trimmed.is_empty() {
            return Err("idea text must not be empty".to_string());
        }
        if self.idea.chars().count() > MAX_IDEA_CHARS {
            return Err(format!(
                "idea text exceeds {} characters",
                MAX_IDEA_CHARS
            ));
        }
        Ok(())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running one stage agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Machine name of the stage (e.g., "market_research").
    pub stage_name: String,
    /// Terminal status of the stage.
    pub status: StageStatus,
    /// Validated output, present when the stage completed.
    pub output: Option<Value>,
    /// Error description, present when the stage failed.
    pub error: Option<String>,
    /// Provider attempts the stage consumed.
    pub attempts: u32,
    /// When the stage reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    /// Create a completed stage result.
    pub fn completed(stage_name: impl Into<String>, output: Value, attempts: u32) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Completed,
            output: Some(output),
            error: None,
            attempts,
            completed_at: Utc::now(),
        }
    }

    /// Create a failed stage result.
    pub fn failed(stage_name: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempts,
            completed_at: Utc::now(),
        }
    }

    /// Returns whether the stage completed successfully.
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Assembled outcome of a full pipeline run.
///
/// Includes every stage that ran, so a continue-on-error run with partial
/// failures still carries the failure markers alongside the successes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    /// Task this report belongs to.
    pub task_id: Uuid,
    /// Name of the pipeline that produced it.
    pub pipeline: String,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// The input that was analyzed.
    pub input: TaskInput,
    /// Per-stage results in execution order.
    pub results: Vec<StageResult>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

impl FinalReport {
    /// Returns whether every stage completed.
    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Completed && self.results.iter().all(StageResult::is_completed)
    }

    /// Names of stages that failed, in execution order.
    pub fn failed_stages(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_completed())
            .map(|r| r.stage_name.as_str())
            .collect()
    }
}

/// Convert a machine stage name to a display name.
///
/// Handles snake_case ("market_research" to "Market Research") and
/// camelCase ("marketResearch" to "Market Research").
pub fn humanize_stage_name(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for chunk in name.split('_') {
        let mut current = String::new();
        for ch in chunk.chars() {
            if ch.is_uppercase() && !current.is_empty() {
                words.push(current);
                current = String::new();
            }
            current.push(ch);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }

    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_input_builder() {
        let input = TaskInput::new("A marketplace for vintage synths")
            .with_title("SynthSwap")
            .with_metadata(json!({"source": "api"}));

        assert_eq!(input.title, Some("SynthSwap".to_string()));
        assert_eq!(input.metadata["source"], "api");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_blank_idea_rejected() {
        assert!(TaskInput::new("").validate().is_err());
        assert!(TaskInput::new("   \n\t ").validate().is_err());
    }

    #[test]
    fn test_oversized_idea_rejected() {
        let input = TaskInput::new("x".repeat(MAX_IDEA_CHARS + 1));
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_stage_result_constructors() {
        let ok = StageResult::completed("market_research", json!({"tam": 1}), 2);
        assert!(ok.is_completed());
        assert_eq!(ok.attempts, 2);
        assert!(ok.error.is_none());

        let bad = StageResult::failed("sizing", "validation failure", 3);
        assert!(!bad.is_completed());
        assert_eq!(bad.error.as_deref(), Some("validation failure"));
        assert!(bad.output.is_none());
    }

    #[test]
    fn test_report_failed_stages() {
        let report = FinalReport {
            task_id: Uuid::new_v4(),
            pipeline: "deep_analysis".to_string(),
            status: RunStatus::Completed,
            input: TaskInput::new("idea"),
            results: vec![
                StageResult::completed("a", json!({}), 1),
                StageResult::failed("b", "boom", 3),
                StageResult::completed("c", json!({}), 1),
            ],
            started_at: Utc::now(),
            completed_at: Utc::now(),
        };

        assert!(!report.is_clean());
        assert_eq!(report.failed_stages(), vec!["b"]);
    }

    #[test]
    fn test_humanize_stage_name() {
        assert_eq!(humanize_stage_name("market_research"), "Market Research");
        assert_eq!(humanize_stage_name("marketResearch"), "Market Research");
        assert_eq!(humanize_stage_name("size"), "Size");
        assert_eq!(
            humanize_stage_name("competitor_analysis"),
            "Competitor Analysis"
        );
    }
}
