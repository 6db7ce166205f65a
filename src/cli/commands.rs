//! CLI command definitions and dispatch.

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{deep_analysis_stages, sizing_stages, StageAgent};
use crate::config::Settings;
use crate::events::EventBroadcaster;
use crate::llm::structured::{InvokeOptions, StructuredClient};
use crate::llm::LlmProvider;
use crate::pipeline::coordinator::{CoordinatorConfig, FailureMode, PipelineCoordinator};
use crate::pipeline::handler::AnalysisJobHandler;
use crate::pipeline::types::{RunStatus, TaskInput};
use crate::queue::{JobQueue, WorkerPool, WorkerPoolConfig};

/// Idea analysis pipelines with schema-validated LLM stages.
#[derive(Parser)]
#[command(name = "ideaforge")]
#[command(about = "Run structured idea-analysis pipelines")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the deep-analysis pipeline on an idea and print the report.
    Analyze(RunArgs),

    /// Run the sizing pipeline on an idea and print the report.
    Size(RunArgs),

    /// Run queue workers that consume idea payloads from stdin, one JSON
    /// object (or plain idea text) per line.
    Worker(WorkerArgs),
}

/// Arguments for the direct pipeline commands.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The idea text to analyze.
    pub idea: String,

    /// Optional short title for the idea.
    #[arg(short, long)]
    pub title: Option<String>,

    /// Model to use (defaults to IDEAFORGE_DEFAULT_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Retries per stage after the first attempt.
    #[arg(long, default_value = "2")]
    pub max_retries: u32,

    /// Print the full report as JSON instead of a summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `ideaforge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of concurrent workers.
    #[arg(short = 'w', long, default_value = "1")]
    pub workers: usize,

    /// Model to use (defaults to IDEAFORGE_DEFAULT_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Retries per stage after the first attempt.
    #[arg(long, default_value = "2")]
    pub max_retries: u32,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatch a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze(args) => {
            run_pipeline(args, "deep_analysis", FailureMode::ContinueOnError).await
        }
        Commands::Size(args) => run_pipeline(args, "sizing", FailureMode::HardStop).await,
        Commands::Worker(args) => run_worker(args).await,
    }
}

fn build_structured_client(settings: &Settings) -> Arc<StructuredClient> {
    let provider: Arc<dyn LlmProvider> = Arc::new(settings.build_client());
    Arc::new(StructuredClient::new(provider, settings.build_limiter()))
}

fn build_stages(
    pipeline: &str,
    client: Arc<StructuredClient>,
    options: InvokeOptions,
) -> Vec<Arc<dyn StageAgent>> {
    match pipeline {
        "sizing" => sizing_stages(client, options),
        _ => deep_analysis_stages(client, options),
    }
}

fn invoke_options(model: Option<String>, max_retries: u32) -> InvokeOptions {
    InvokeOptions::new(model.unwrap_or_default()).with_max_retries(max_retries)
}

async fn run_pipeline(args: RunArgs, pipeline: &str, mode: FailureMode) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading provider settings")?;
    let client = build_structured_client(&settings);
    let metrics = client.metrics();

    let options = invoke_options(args.model, args.max_retries);
    let stages = build_stages(pipeline, client, options);

    let broadcaster = Arc::new(EventBroadcaster::default());
    let coordinator = PipelineCoordinator::new(
        stages,
        Arc::clone(&broadcaster),
        CoordinatorConfig::new(pipeline, mode),
    );

    let task_id = Uuid::new_v4();
    let mut rx = broadcaster.subscribe(task_id);
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!(agent = %event.agent_id, step = %event.step, "{}", event.message);
        }
    });

    let mut input = TaskInput::new(args.idea);
    if let Some(title) = args.title {
        input = input.with_title(title);
    }

    let report = coordinator.run_task(task_id, input).await?;

    broadcaster.unsubscribe(task_id);
    let _ = printer.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("pipeline: {} ({})", report.pipeline, report.status);
        for result in &report.results {
            match &result.error {
                None => println!("  {} completed ({} attempts)", result.stage_name, result.attempts),
                Some(error) => println!("  {} failed: {}", result.stage_name, error),
            }
        }
    }

    let usage = metrics.snapshot();
    info!(
        calls = usage.calls,
        tokens = usage.total_tokens(),
        errors = usage.errors,
        "provider usage"
    );

    if report.status == RunStatus::Failed {
        anyhow::bail!("pipeline did not complete");
    }
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("loading provider settings")?;
    let client = build_structured_client(&settings);

    let options = invoke_options(args.model, args.max_retries);
    let stages = deep_analysis_stages(client, options);

    let broadcaster = Arc::new(EventBroadcaster::default());
    let coordinator = Arc::new(PipelineCoordinator::new(
        stages,
        broadcaster,
        CoordinatorConfig::new("deep_analysis", FailureMode::ContinueOnError),
    ));

    let (queue, feed) = JobQueue::new();
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::default().with_num_workers(args.workers),
        Arc::clone(&queue),
        feed,
        Arc::new(AnalysisJobHandler::new(coordinator)),
    );
    pool.start();

    info!(workers = args.workers, "reading idea payloads from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        // A line is either a TaskInput JSON object or bare idea text.
        let payload = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(value) if value.is_object() => value,
            _ => json!({ "idea": line }),
        };

        match queue.enqueue(payload).await {
            Ok(handle) => println!("submitted {}", handle.id),
            Err(e) => warn!(error = %e, "failed to enqueue payload"),
        }
    }

    // Drain before shutting the pool down.
    while queue.stats().await.has_pending() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    pool.shutdown().await;

    let stats = queue.stats().await;
    info!(
        completed = stats.completed,
        failed = stats.failed,
        "worker run finished"
    );
    Ok(())
}
