//! Error types for ideaforge operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API transport and provider errors
//! - Structured-output invocation failures
//! - Pipeline orchestration
//! - Job queue operations

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: IDEAFORGE_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Stream ended unexpectedly: {0}")]
    StreamInterrupted(String),
}

impl LlmError {
    /// Returns whether this error class is worth retrying.
    ///
    /// Client-side 4xx errors (other than 429) indicate a malformed request
    /// and will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
