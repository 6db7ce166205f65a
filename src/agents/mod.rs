//! Stage agents.
//!
//! A stage agent is one generative step in a pipeline: it renders its
//! prompt template against the task input and the accumulated context of
//! earlier stages, then asks the structured client for output satisfying
//! its contract. `PromptAgent` covers every built-in stage; the trait
//! exists so tests and callers can substitute scripted stages.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::llm::structured::{InvokeFailure, InvokeOptions, StructuredClient};
use crate::pipeline::types::TaskInput;
use crate::schema::{SchemaContract, ValueKind};

/// Errors a stage agent can produce.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("structured invocation failed: {0}")]
    Invoke(#[from] InvokeFailure),
}

impl StageError {
    /// Provider attempts consumed before the failure.
    pub fn attempts(&self) -> u32 {
        match self {
            StageError::Invoke(failure) => failure.attempts,
        }
    }
}

/// Successful output of a stage, with its attempt count.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Contract-validated JSON output.
    pub value: Value,
    /// Provider attempts the stage consumed (1 = first try).
    pub attempts: u32,
}

/// A single generative step in a pipeline.
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// Machine name of the stage (snake_case).
    fn name(&self) -> &str;

    /// Run the stage against the input and prior-stage context.
    async fn invoke(&self, input: &TaskInput, context: &str) -> Result<StageOutput, StageError>;
}

/// A stage agent driven by a prompt template and an output contract.
pub struct PromptAgent {
    name: String,
    system_prompt: String,
    user_template: String,
    contract: SchemaContract,
    options: InvokeOptions,
    client: Arc<StructuredClient>,
}

impl PromptAgent {
    /// Create a new prompt-driven agent.
    ///
    /// The user template may reference `{idea}` and `{context}`, replaced
    /// at invocation time.
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        user_template: impl Into<String>,
        contract: SchemaContract,
        options: InvokeOptions,
        client: Arc<StructuredClient>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            user_template: user_template.into(),
            contract,
            options,
            client,
        }
    }

    /// Get the output contract.
    pub fn contract(&self) -> &SchemaContract {
        &self.contract
    }
}

#[async_trait]
impl StageAgent for PromptAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, input: &TaskInput, context: &str) -> Result<StageOutput, StageError> {
        let user_prompt = self
            .user_template
            .replace("{idea}", &input.idea)
            .replace("{context}", context);

        let output = self
            .client
            .invoke(&self.contract, &self.system_prompt, &user_prompt, &self.options)
            .await?;

        Ok(StageOutput {
            value: output.value,
            attempts: output.attempts,
        })
    }
}

/// Shared preamble for all analysis agents.
const ANALYST_SYSTEM_PROMPT: &str = "\
You are a startup analyst producing structured assessments of business ideas. \
Base your analysis only on the idea and context provided. \
Respond with a single JSON object and no surrounding prose.";

const PROBLEM_VALIDATION_TEMPLATE: &str = "\
Assess whether the following idea addresses a real, painful problem.

Idea: {idea}

{context}

Return a JSON object with:
- problem_statement: one-sentence statement of the underlying problem
- target_users: array of at least 2 affected user groups
- severity: number from 0 to 10, how painful the problem is today
- evidence: array of observations supporting or undermining the problem";

const MARKET_RESEARCH_TEMPLATE: &str = "\
Research the market for the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- summary: short market overview
- market_size_usd: estimated annual market size in USD
- trends: array of at least 3 relevant market trends
- growth_outlook: one of \"declining\", \"flat\", \"growing\", \"accelerating\"";

const COMPETITOR_ANALYSIS_TEMPLATE: &str = "\
Identify competition for the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- competitors: array of at least 3 objects, each with name and positioning
- differentiation: how this idea could stand apart
- threat_level: one of \"low\", \"medium\", \"high\"";

const MONETIZATION_TEMPLATE: &str = "\
Propose monetization strategies for the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- models: array of at least 2 candidate revenue models
- recommended_model: the single best model and why
- confidence: number from 0 to 1";

const RISK_ASSESSMENT_TEMPLATE: &str = "\
Assess the risks of pursuing the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- risks: array of at least 3 objects, each with description and likelihood
- mitigations: array of mitigation ideas
- overall_risk: one of \"low\", \"medium\", \"high\"";

const NORMALIZE_TEMPLATE: &str = "\
Normalize the following raw idea text into a precise product statement.

Idea: {idea}

Return a JSON object with:
- normalized_idea: a precise one-paragraph restatement
- category: the product category this belongs to
- keywords: array of at least 3 search keywords for this idea";

const SEARCH_TEMPLATE: &str = "\
Survey existing products related to the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- related_products: array of at least 1 existing product or project
- novelty_score: number from 0 to 1, how novel the idea appears";

const SIZE_TEMPLATE: &str = "\
Size the opportunity for the following idea.

Idea: {idea}

{context}

Return a JSON object with:
- market_tier: one of \"niche\", \"mid\", \"mass\"
- estimated_tam_usd: estimated total addressable market in USD
- rationale: short justification for the sizing";

/// Build the deep-analysis stage roster.
///
/// Five stages run in order; the pipeline is configured to continue past
/// individual stage failures so a partial report is still produced.
pub fn deep_analysis_stages(
    client: Arc<StructuredClient>,
    options: InvokeOptions,
) -> Vec<Arc<dyn StageAgent>> {
    vec![
        Arc::new(PromptAgent::new(
            "problem_validation",
            ANALYST_SYSTEM_PROMPT,
            PROBLEM_VALIDATION_TEMPLATE,
            SchemaContract::new("problem_validation")
                .require("problem_statement", ValueKind::String)
                .min_items("target_users", 2)
                .in_range("severity", 0.0, 10.0)
                .require("evidence", ValueKind::Array),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "market_research",
            ANALYST_SYSTEM_PROMPT,
            MARKET_RESEARCH_TEMPLATE,
            SchemaContract::new("market_research")
                .require("summary", ValueKind::String)
                .in_range("market_size_usd", 0.0, 1e15)
                .min_items("trends", 3)
                .one_of(
                    "growth_outlook",
                    ["declining", "flat", "growing", "accelerating"],
                ),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "competitor_analysis",
            ANALYST_SYSTEM_PROMPT,
            COMPETITOR_ANALYSIS_TEMPLATE,
            SchemaContract::new("competitor_analysis")
                .min_items("competitors", 3)
                .require("differentiation", ValueKind::String)
                .one_of("threat_level", ["low", "medium", "high"]),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "monetization",
            ANALYST_SYSTEM_PROMPT,
            MONETIZATION_TEMPLATE,
            SchemaContract::new("monetization")
                .min_items("models", 2)
                .require("recommended_model", ValueKind::String)
                .in_range("confidence", 0.0, 1.0),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "risk_assessment",
            ANALYST_SYSTEM_PROMPT,
            RISK_ASSESSMENT_TEMPLATE,
            SchemaContract::new("risk_assessment")
                .min_items("risks", 3)
                .require("mitigations", ValueKind::Array)
                .one_of("overall_risk", ["low", "medium", "high"]),
            options,
            client,
        )),
    ]
}

/// Build the sizing stage roster.
///
/// Three stages where each depends on the previous one's output; the
/// pipeline is configured to hard-stop on the first failure.
pub fn sizing_stages(
    client: Arc<StructuredClient>,
    options: InvokeOptions,
) -> Vec<Arc<dyn StageAgent>> {
    vec![
        Arc::new(PromptAgent::new(
            "normalize",
            ANALYST_SYSTEM_PROMPT,
            NORMALIZE_TEMPLATE,
            SchemaContract::new("normalize")
                .require("normalized_idea", ValueKind::String)
                .require("category", ValueKind::String)
                .min_items("keywords", 3),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "search",
            ANALYST_SYSTEM_PROMPT,
            SEARCH_TEMPLATE,
            SchemaContract::new("search")
                .min_items("related_products", 1)
                .in_range("novelty_score", 0.0, 1.0),
            options.clone(),
            Arc::clone(&client),
        )),
        Arc::new(PromptAgent::new(
            "size",
            ANALYST_SYSTEM_PROMPT,
            SIZE_TEMPLATE,
            SchemaContract::new("size")
                .one_of("market_tier", ["niche", "mid", "mass"])
                .in_range("estimated_tam_usd", 0.0, 1e15)
                .require("rationale", ValueKind::String),
            options,
            client,
        )),
    ]
}
