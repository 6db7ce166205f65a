//! Environment-driven configuration.
//!
//! Settings are read once at startup and handed to the components that
//! need them. Only the API base is mandatory; everything else defaults.

use std::env;

use crate::error::LlmError;
use crate::llm::client::ChatClient;
use crate::llm::limiter::RateLimiter;

/// Default provider-call budget per minute.
const DEFAULT_CALLS_PER_MINUTE: u32 = 30;

/// Runtime settings for provider access.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL for the chat-completions API.
    pub api_base: String,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Model used when a command does not override it.
    pub default_model: String,
    /// Provider-call budget, enforced by the rate limiter.
    pub calls_per_minute: u32,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// Environment variables:
    /// - `IDEAFORGE_API_BASE`: API base URL (required)
    /// - `IDEAFORGE_API_KEY`: API key (optional)
    /// - `IDEAFORGE_DEFAULT_MODEL`: default model
    /// - `IDEAFORGE_CALLS_PER_MINUTE`: rate budget (default 30)
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("IDEAFORGE_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("IDEAFORGE_API_KEY").ok();
        let default_model = env::var("IDEAFORGE_DEFAULT_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-opus-4.5".to_string());
        let calls_per_minute = env::var("IDEAFORGE_CALLS_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CALLS_PER_MINUTE);

        Ok(Self {
            api_base,
            api_key,
            default_model,
            calls_per_minute,
        })
    }

    /// Build the HTTP chat client from these settings.
    pub fn build_client(&self) -> ChatClient {
        ChatClient::new(
            self.api_base.clone(),
            self.api_key.clone(),
            self.default_model.clone(),
        )
    }

    /// Build the rate limiter from the calls-per-minute budget.
    pub fn build_limiter(&self) -> RateLimiter {
        RateLimiter::from_calls_per_minute(self.calls_per_minute)
    }
}
