//! Structured-output client.
//!
//! Wraps an `LlmProvider` with the machinery stage agents need: JSON
//! extraction, contract validation, and error-feedback retry. When a
//! response violates its contract, the violations are folded into the
//! system prompt for the next attempt so the model sees exactly which
//! fields to fix. Retries back off linearly and every attempt passes
//! through the shared rate limiter.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::error::LlmError;
use crate::llm::client::{GenerationRequest, LlmProvider, Message};
use crate::llm::extract::extract_json;
use crate::llm::limiter::RateLimiter;
use crate::llm::metrics::UsageMetrics;
use crate::schema::{feedback_for, SchemaContract};

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay for linear backoff between attempts.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Per-invocation generation options.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Model identifier; empty means the provider default.
    pub model: String,
    /// Retries after the first attempt (total attempts = retries + 1).
    pub max_retries: u32,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl InvokeOptions {
    /// Create options for the given model with default retry settings.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the number of retries after the first attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self::new("")
    }
}

/// A validated structured result.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    /// The parsed JSON value, guaranteed to satisfy the contract.
    pub value: Value,
    /// Number of attempts it took (1 = first try).
    pub attempts: u32,
}

/// Why an invocation ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt produced output that violated the contract or could
    /// not be parsed as JSON.
    Validation,
    /// The last attempt failed at the transport or provider level.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::Transport => write!(f, "transport"),
        }
    }
}

/// Terminal failure after exhausting all attempts.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure after {attempts} attempts: {last_error}")]
pub struct InvokeFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub last_error: String,
}

/// Provider wrapper with validation, feedback retry, and rate limiting.
pub struct StructuredClient {
    provider: Arc<dyn LlmProvider>,
    limiter: RateLimiter,
    metrics: Arc<UsageMetrics>,
    backoff_base: Duration,
}

impl StructuredClient {
    /// Create a client over the given provider and rate limiter.
    pub fn new(provider: Arc<dyn LlmProvider>, limiter: RateLimiter) -> Self {
        Self {
            provider,
            limiter,
            metrics: Arc::new(UsageMetrics::new()),
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Set the base delay for linear backoff.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Get a handle to the usage counters.
    pub fn metrics(&self) -> Arc<UsageMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Generate output satisfying `contract`, retrying with feedback.
    ///
    /// Attempt flow: acquire a rate permit, call the provider, extract and
    /// parse JSON, validate against the contract. On a validation failure
    /// the next attempt's system prompt carries the violation list; on a
    /// transport failure the prompt is unchanged. Backoff before attempt
    /// `n` is `(n - 1) * backoff_base`.
    pub async fn invoke(
        &self,
        contract: &SchemaContract,
        system_prompt: &str,
        user_prompt: &str,
        options: &InvokeOptions,
    ) -> Result<StructuredOutput, InvokeFailure> {
        let total_attempts = options.max_retries + 1;
        let mut feedback: Option<String> = None;
        let mut last_error = String::from("no attempts were made");
        let mut last_kind = FailureKind::Transport;
        let mut attempts_made = 0;

        for attempt in 1..=total_attempts {
            attempts_made = attempt;
            if attempt > 1 {
                sleep(self.backoff_base * (attempt - 1)).await;
            }

            let system = match &feedback {
                Some(text) => format!("{}\n\n{}", system_prompt, text),
                None => system_prompt.to_string(),
            };

            let mut request = GenerationRequest::new(
                options.model.clone(),
                vec![Message::system(system), Message::user(user_prompt)],
            );
            request.temperature = options.temperature;
            request.max_tokens = options.max_tokens;

            let permit = self.limiter.acquire().await;
            self.metrics.record_attempt();
            let response = self.provider.generate(request).await;
            drop(permit);

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        contract = contract.name(),
                        attempt,
                        error = %e,
                        "provider call failed"
                    );
                    last_error = e.to_string();
                    last_kind = FailureKind::Transport;
                    if !e.is_retryable() {
                        break;
                    }
                    continue;
                }
            };

            self.metrics.record_usage(&response.usage);

            let content = response.first_content().unwrap_or_default();
            let value: Value = match extract_json(content)
                .ok_or_else(|| "no JSON value found in response".to_string())
                .and_then(|candidate| {
                    serde_json::from_str(&candidate).map_err(|e| e.to_string())
                }) {
                Ok(value) => value,
                Err(reason) => {
                    self.metrics.record_error();
                    tracing::warn!(
                        contract = contract.name(),
                        attempt,
                        %reason,
                        "response was not parseable JSON"
                    );
                    last_error = format!("unparseable response: {}", reason);
                    last_kind = FailureKind::Validation;
                    feedback = Some(format!(
                        "Your previous response could not be parsed as JSON ({}). \
                         Respond with a single valid JSON object and nothing else.",
                        reason
                    ));
                    continue;
                }
            };

            let violations = contract.validate(&value);
            if violations.is_empty() {
                tracing::debug!(contract = contract.name(), attempt, "structured output accepted");
                return Ok(StructuredOutput { value, attempts: attempt });
            }

            self.metrics.record_error();
            tracing::warn!(
                contract = contract.name(),
                attempt,
                violations = violations.len(),
                "response violated output contract"
            );
            last_error = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            last_kind = FailureKind::Validation;
            feedback = Some(feedback_for(&violations));
        }

        Err(InvokeFailure {
            kind: last_kind,
            attempts: attempts_made,
            last_error,
        })
    }

    /// Stream raw text for the given prompts, bypassing validation.
    ///
    /// Chunks are relayed in order as the provider emits them. No retry is
    /// applied; a transport error surfaces directly to the caller. The
    /// call still consumes a rate permit for its full duration.
    pub async fn stream(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), LlmError> {
        let request = GenerationRequest::new(
            model,
            vec![Message::system(system_prompt), Message::user(user_prompt)],
        );

        let _permit = self.limiter.acquire().await;
        self.metrics.record_attempt();
        let result = self.provider.generate_stream(request, on_chunk).await;
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{Choice, GenerationResponse, Usage};
    use crate::schema::ValueKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted provider: pops one canned result per call and records
    /// every request it sees.
    struct MockProvider {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
        call_times: Mutex<Vec<Instant>>,
    }

    impl MockProvider {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
                call_times: Mutex::new(Vec::new()),
            }
        }

        fn system_prompt_of_call(&self, index: usize) -> String {
            let requests = self.requests.lock().unwrap();
            requests[index].messages[0].content.clone()
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.call_times.lock().unwrap().push(Instant::now());
            self.requests.lock().unwrap().push(request);

            let scripted = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("mock provider ran out of scripted responses");

            scripted.map(|content| GenerationResponse {
                id: "mock".to_string(),
                model: "mock-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            })
        }
    }

    fn fast_client(provider: MockProvider) -> StructuredClient {
        StructuredClient::new(
            Arc::new(provider),
            RateLimiter::new(Duration::from_millis(1)),
        )
        .with_backoff_base(Duration::from_millis(1))
    }

    fn score_contract() -> SchemaContract {
        SchemaContract::new("scored")
            .require("verdict", ValueKind::String)
            .in_range("score", 0.0, 1.0)
    }

    #[tokio::test]
    async fn test_valid_first_response_accepted() {
        let provider = MockProvider::new(vec![Ok(
            r#"{"verdict": "viable", "score": 0.8}"#.to_string()
        )]);
        let client = fast_client(provider);

        let output = client
            .invoke(&score_contract(), "Return JSON.", "Assess.", &InvokeOptions::default())
            .await
            .expect("should accept valid output");

        assert_eq!(output.attempts, 1);
        assert_eq!(output.value["verdict"], "viable");
    }

    #[tokio::test]
    async fn test_retry_prompt_carries_violation_details() {
        let mock = Arc::new(MockProvider::new(vec![
            Ok(r#"{"verdict": "viable", "score": 3.5}"#.to_string()),
            Ok(r#"{"verdict": "viable", "score": 0.9}"#.to_string()),
        ]));
        let client = StructuredClient::new(
            Arc::clone(&mock) as Arc<dyn LlmProvider>,
            RateLimiter::new(Duration::from_millis(1)),
        )
        .with_backoff_base(Duration::from_millis(1));

        let output = client
            .invoke(&score_contract(), "Return JSON.", "Assess.", &InvokeOptions::default())
            .await
            .expect("second attempt should succeed");

        assert_eq!(output.attempts, 2);

        let first_system = mock.system_prompt_of_call(0);
        assert!(!first_system.contains("failed validation"));

        let second_system = mock.system_prompt_of_call(1);
        assert!(second_system.contains("`score`"));
        assert!(second_system.contains("number between 0 and 1"));
    }

    #[tokio::test]
    async fn test_exhaustion_classified_as_validation() {
        let provider = MockProvider::new(vec![
            Ok("not json at all".to_string()),
            Ok(r#"{"verdict": 12, "score": 0.5}"#.to_string()),
            Ok(r#"{"score": 0.5}"#.to_string()),
        ]);
        let client = fast_client(provider);

        let failure = client
            .invoke(
                &score_contract(),
                "Return JSON.",
                "Assess.",
                &InvokeOptions::default().with_max_retries(2),
            )
            .await
            .expect_err("should exhaust attempts");

        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.attempts, 3);
        assert!(failure.last_error.contains("verdict"));
    }

    #[tokio::test]
    async fn test_transport_error_retried_then_succeeds() {
        let provider = MockProvider::new(vec![
            Err(LlmError::RequestFailed("connection reset".to_string())),
            Ok(r#"{"verdict": "viable", "score": 0.4}"#.to_string()),
        ]);
        let client = fast_client(provider);

        let output = client
            .invoke(&score_contract(), "Return JSON.", "Assess.", &InvokeOptions::default())
            .await
            .expect("should recover after transport error");

        assert_eq!(output.attempts, 2);
    }

    #[tokio::test]
    async fn test_persistent_transport_failure_classified() {
        let provider = MockProvider::new(vec![
            Err(LlmError::RequestFailed("timeout".to_string())),
            Err(LlmError::RequestFailed("timeout".to_string())),
        ]);
        let client = fast_client(provider);

        let failure = client
            .invoke(
                &score_contract(),
                "Return JSON.",
                "Assess.",
                &InvokeOptions::default().with_max_retries(1),
            )
            .await
            .expect_err("should fail");

        assert_eq!(failure.kind, FailureKind::Transport);
        assert!(failure.last_error.contains("timeout"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_early() {
        let provider = MockProvider::new(vec![Err(LlmError::ApiError {
            code: 400,
            message: "bad request".to_string(),
        })]);
        let client = fast_client(provider);

        let failure = client
            .invoke(
                &score_contract(),
                "Return JSON.",
                "Assess.",
                &InvokeOptions::default().with_max_retries(2),
            )
            .await
            .expect_err("should fail without retrying");

        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(client.metrics().snapshot().calls, 1);
    }

    #[tokio::test]
    async fn test_calls_respect_minimum_spacing() {
        let mock = Arc::new(MockProvider::new(vec![
            Ok(r#"{"verdict": "a", "score": 0.1}"#.to_string()),
            Ok(r#"{"verdict": "b", "score": 0.2}"#.to_string()),
        ]));
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let client = StructuredClient::new(Arc::clone(&mock) as Arc<dyn LlmProvider>, limiter)
            .with_backoff_base(Duration::from_millis(1));

        let contract = score_contract();
        let options = InvokeOptions::default();
        client
            .invoke(&contract, "Return JSON.", "One.", &options)
            .await
            .expect("first invoke");
        client
            .invoke(&contract, "Return JSON.", "Two.", &options)
            .await
            .expect("second invoke");

        let times = mock.call_times.lock().unwrap();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_concurrent_invokes_are_spaced() {
        let mock = Arc::new(MockProvider::new(vec![
            Ok(r#"{"verdict": "a", "score": 0.1}"#.to_string()),
            Ok(r#"{"verdict": "b", "score": 0.2}"#.to_string()),
            Ok(r#"{"verdict": "c", "score": 0.3}"#.to_string()),
        ]));
        let client = Arc::new(
            StructuredClient::new(
                Arc::clone(&mock) as Arc<dyn LlmProvider>,
                RateLimiter::new(Duration::from_millis(40)),
            )
            .with_backoff_base(Duration::from_millis(1)),
        );

        let mut handles = Vec::new();
        for _ in 0..3 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client
                    .invoke(&score_contract(), "Return JSON.", "Assess.", &InvokeOptions::default())
                    .await
                    .expect("invoke should succeed");
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        // The limiter serializes calls, so recorded times are in order.
        let times = mock.call_times.lock().unwrap();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(40));
        }
    }

    #[tokio::test]
    async fn test_stream_relays_chunks_in_order() {
        struct ChunkedProvider;

        #[async_trait]
        impl LlmProvider for ChunkedProvider {
            async fn generate(
                &self,
                _request: GenerationRequest,
            ) -> Result<GenerationResponse, LlmError> {
                unreachable!("streaming must not fall back to generate");
            }

            async fn generate_stream(
                &self,
                _request: GenerationRequest,
                on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
            ) -> Result<(), LlmError> {
                for chunk in ["The ", "idea ", "is {not json"] {
                    on_chunk(chunk);
                }
                Ok(())
            }
        }

        let client = StructuredClient::new(
            Arc::new(ChunkedProvider),
            RateLimiter::new(Duration::from_millis(1)),
        );

        let mut received = Vec::new();
        let mut sink = |chunk: &str| received.push(chunk.to_string());
        client
            .stream("m", "Stream it.", "Go.", &mut sink)
            .await
            .expect("stream should succeed");

        // Chunks arrive in emission order and are never validated.
        assert_eq!(received, vec!["The ", "idea ", "is {not json"]);
        assert_eq!(client.metrics().snapshot().calls, 1);
    }

    #[tokio::test]
    async fn test_metrics_track_attempts_and_errors() {
        let provider = MockProvider::new(vec![
            Ok(r#"{"score": 9.0}"#.to_string()),
            Ok(r#"{"verdict": "ok", "score": 0.5}"#.to_string()),
        ]);
        let client = fast_client(provider);

        client
            .invoke(&score_contract(), "Return JSON.", "Assess.", &InvokeOptions::default())
            .await
            .expect("should succeed on retry");

        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.total_tokens(), 30);
    }
}
