//! OpenAI-compatible chat client.
//!
//! This module provides the low-level client for chat-completion APIs,
//! plus the `LlmProvider` trait that the rest of the crate programs
//! against. Streaming uses server-sent events over the same endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0). Higher values = more random.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;

    /// Stream a response, delivering text fragments to `on_chunk` as they
    /// arrive. Chunks are delivered in order; no validation is applied.
    ///
    /// The default implementation performs a blocking generate and relays
    /// the full text as a single chunk, so providers without native
    /// streaming still satisfy the contract.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LlmError> {
        let response = self.generate(request).await?;
        if let Some(content) = response.first_content() {
            on_chunk(content);
        }
        Ok(())
    }
}

/// Client for OpenAI-compatible chat-completion APIs.
pub struct ChatClient {
    /// Base URL for the API.
    api_base: String,
    /// Optional API key for authentication.
    api_key: Option<String>,
    /// Default model to use for requests.
    default_model: String,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl ChatClient {
    /// Create a new chat client with explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL for the API (e.g., "http://localhost:4000/v1")
    /// * `api_key` - Optional API key for authentication
    /// * `default_model` - Default model to use when none is specified
    pub fn new(api_base: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            api_base,
            api_key,
            default_model,
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Get the default model.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn resolve_model(&self, requested: &str) -> String {
        if requested.is_empty() {
            self.default_model.clone()
        } else {
            requested.to_string()
        }
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut http_request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        http_request
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// Internal response structure from the OpenAI-compatible API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    choices: Vec<ApiChoice>,
    usage: ApiUsage,
}

/// Internal choice structure from the API response.
#[derive(Debug, Deserialize)]
struct ApiChoice {
    index: u32,
    message: ApiMessage,
    finish_reason: String,
}

/// Internal message structure from the API response.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

/// Internal usage structure from the API response.
#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Error detail from the API.
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Fields kept for complete API error deserialization
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

/// A single SSE chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Convert a non-success HTTP response into an `LlmError`.
async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status_code = response.status().as_u16();

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
        if status_code == 429 {
            return LlmError::RateLimited(error_response.error.message);
        }

        return LlmError::ApiError {
            code: status_code,
            message: error_response.error.message,
        };
    }

    LlmError::ApiError {
        code: status_code,
        message: error_text,
    }
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let api_request = ApiRequest {
            model: self.resolve_model(&request.model),
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: None,
        };

        let url = format!("{}/chat/completions", self.api_base);

        let http_response = self
            .build_request(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !http_response.status().is_success() {
            return Err(error_from_response(http_response).await);
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: choice.message.content,
                },
                finish_reason: choice.finish_reason,
            })
            .collect();

        Ok(GenerationResponse {
            id: api_response.id,
            model: api_response.model,
            choices,
            usage: Usage {
                prompt_tokens: api_response.usage.prompt_tokens,
                completion_tokens: api_response.usage.completion_tokens,
                total_tokens: api_response.usage.total_tokens,
            },
        })
    }

    async fn generate_stream(
        &self,
        request: GenerationRequest,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LlmError> {
        let api_request = ApiRequest {
            model: self.resolve_model(&request.model),
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(true),
        };

        let url = format!("{}/chat/completions", self.api_base);

        let http_response = self
            .build_request(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !http_response.status().is_success() {
            return Err(error_from_response(http_response).await);
        }

        let mut byte_stream = http_response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::StreamInterrupted(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE frames are newline-delimited "data: <json>" lines.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();

                if payload == "[DONE]" {
                    return Ok(());
                }

                let parsed: StreamChunk = serde_json::from_str(payload).map_err(|e| {
                    LlmError::ParseError(format!("Failed to parse stream chunk: {}", e))
                })?;

                if let Some(text) = parsed
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_deref())
                {
                    if !text.is_empty() {
                        on_chunk(text);
                    }
                }
            }
        }

        Ok(())
    }
}
