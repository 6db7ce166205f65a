//! Pipeline orchestration.
//!
//! A pipeline is an ordered roster of stage agents run by the
//! `PipelineCoordinator`. Two built-in rosters exist:
//!
//! - **deep_analysis**: five independent analysis stages, configured to
//!   continue past stage failures and produce a partial report
//! - **sizing**: three dependent stages, configured to hard-stop because
//!   each stage consumes the previous stage's output
//!
//! `AnalysisJobHandler` adapts a coordinator to the job queue so runs can
//! be submitted asynchronously.

pub mod coordinator;
pub mod handler;
pub mod types;

pub use coordinator::{CoordinatorConfig, FailureMode, OrchestrationError, PipelineCoordinator};
pub use handler::AnalysisJobHandler;
pub use types::{FinalReport, RunStatus, StageResult, StageStatus, TaskInput};
