//! ideaforge: structured idea-analysis pipelines.
//!
//! This library runs business ideas through ordered rosters of generative
//! stage agents, validates every model response against a declarative
//! output contract, and reports progress over per-task broadcast channels.
//! Runs can execute directly or through an asynchronous job queue with
//! bounded retries.

// Core modules
pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod schema;

// Re-export commonly used types
pub use error::LlmError;
pub use llm::structured::{InvokeFailure, InvokeOptions, StructuredClient};
pub use pipeline::{FinalReport, PipelineCoordinator, TaskInput};
