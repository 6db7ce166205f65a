//! Usage accounting for provider calls.
//!
//! `UsageMetrics` is an explicitly owned component: the structured client
//! holds one and updates it on every attempt. Callers read a point-in-time
//! `UsageSnapshot` rather than the live counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::llm::client::Usage;

/// Atomic counters for provider-call usage.
#[derive(Debug, Default)]
pub struct UsageMetrics {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time view of usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub errors: u64,
}

impl UsageSnapshot {
    /// Total tokens consumed across all calls.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl UsageMetrics {
    /// Create a fresh metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a provider call was attempted.
    pub fn record_attempt(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record token usage from a successful response.
    pub fn record_usage(&self, usage: &Usage) {
        self.prompt_tokens
            .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
    }

    /// Record a failed attempt (transport, parse, or validation).
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
