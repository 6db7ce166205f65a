//! LLM integration layer.
//!
//! - `client`: OpenAI-compatible chat client and the `LlmProvider` trait
//! - `limiter`: inter-call spacing and single-flight enforcement
//! - `extract`: JSON recovery from fenced or prose-wrapped model output
//! - `metrics`: usage counters shared across the process
//! - `structured`: contract-validated generation with feedback retry

pub mod client;
pub mod extract;
pub mod limiter;
pub mod metrics;
pub mod structured;

pub use client::{ChatClient, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
pub use limiter::RateLimiter;
pub use metrics::{UsageMetrics, UsageSnapshot};
pub use structured::{FailureKind, InvokeFailure, InvokeOptions, StructuredClient, StructuredOutput};
