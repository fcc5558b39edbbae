//! CLI command definitions for cognito-score.
//!
//! `run` evaluates a set of candidate models end to end; `kit` only generates
//! a test kit.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::agents::{AgentError, PipelineOrchestrator};
use crate::config::EvaluationConfig;
use crate::llm::{CandidatesPayload, LiteLlmClient, LlmProvider, ModelRegistry, OpenRouterProvider};

/// Rank LLM candidates on a freshly generated exam.
#[derive(Parser)]
#[command(name = "cognito-score")]
#[command(about = "Rank candidate LLMs on a generated exam judged by another LLM")]
#[command(version)]
#[command(
    long_about = "cognito-score asks an author model for a test kit, poses every question to every candidate model in parallel, and lets a judge model score and rank the candidates.\n\nExample usage:\n  cognito-score run --model modelA=openai/gpt-4o-mini --model modelB=mistralai/mistral-small --questions 3\n  cognito-score run --candidates candidates.json --json"
)]
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
    /// Generate a test kit, examine every candidate and rank them.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Generate a test kit only.
    Kit(KitArgs),
}

/// Model provider selection shared by all commands.
#[derive(clap::Args, Debug, Clone)]
pub struct ProviderArgs {
    /// OpenRouter API key. Without one, the LiteLLM proxy configured by
    /// LITELLM_API_BASE / LITELLM_API_KEY is used.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the OpenRouter-compatible base URL.
    #[arg(long, env = "OPENROUTER_BASE_URL")]
    pub api_base: Option<String>,
}

/// Arguments for `cognito-score run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON file of the form {"models": {"alias": "model-id", ...}}.
    #[arg(short = 'c', long)]
    pub candidates: Option<PathBuf>,

    /// Candidate as ALIAS=MODEL_ID (repeatable).
    #[arg(short = 'm', long = "model", value_name = "ALIAS=MODEL_ID")]
    pub models: Vec<String>,

    /// Number of questions in the test kit.
    #[arg(short = 'n', long)]
    pub questions: Option<usize>,

    /// Model that writes the test kit.
    #[arg(long)]
    pub author_model: Option<String>,

    /// Model that scores and ranks the candidates.
    #[arg(long)]
    pub judge_model: Option<String>,

    /// Maximum examination calls in flight.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Rewrite the judge's ranks as 1..N by score.
    #[arg(long)]
    pub normalize_ranks: bool,

    /// Print the full result as JSON instead of a ranking table.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Also write the full result as JSON to this file.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Arguments for `cognito-score kit`.
#[derive(Parser, Debug)]
pub struct KitArgs {
    /// Number of questions in the test kit.
    #[arg(short = 'n', long)]
    pub questions: Option<usize>,

    /// Model that writes the test kit.
    #[arg(long)]
    pub author_model: Option<String>,

    /// Write the test kit to this file instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse and run in one step.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evaluation_command(args).await,
        Commands::Kit(args) => run_kit_command(args).await,
    }
}

async fn run_evaluation_command(args: RunArgs) -> anyhow::Result<()> {
    let config = run_config(&args)?;
    let payload = load_candidates(args.candidates.as_deref(), &args.models)?;
    let provider = build_llm_client(&args.provider, &config.judge_model)?;

    let registry = ModelRegistry::from_payload(Arc::clone(&provider), &payload)?;
    info!(
        candidates = registry.len(),
        author_model = %config.author_model,
        judge_model = %config.judge_model,
        "Starting evaluation"
    );

    let orchestrator = PipelineOrchestrator::from_provider(&config, provider);
    let result = orchestrator
        .evaluate(&registry)
        .await
        .map_err(pipeline_failure)?;

    if let Some(path) = &args.output {
        write_json(path, &result)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.evaluation_result);
        if let Some(winner) = result.evaluation_result.winner() {
            println!("\nWinner: {} (score {})", winner.name, winner.score);
        }
    }
    Ok(())
}

async fn run_kit_command(args: KitArgs) -> anyhow::Result<()> {
    let mut config = EvaluationConfig::from_env()?;
    if let Some(n) = args.questions {
        config.question_count = n;
    }
    if let Some(model) = &args.author_model {
        config.author_model = model.clone();
    }
    config.validate()?;

    let provider = build_llm_client(&args.provider, &config.author_model)?;
    let orchestrator = PipelineOrchestrator::from_provider(&config, provider);
    let kit = orchestrator
        .generate_test_kit(config.question_count)
        .await
        .map_err(pipeline_failure)?;

    match &args.output {
        Some(path) => write_json(path, &kit)?,
        None => println!("{}", serde_json::to_string_pretty(&kit)?),
    }
    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn run_config(args: &RunArgs) -> anyhow::Result<EvaluationConfig> {
    let mut config = EvaluationConfig::from_env()?;
    if let Some(n) = args.questions {
        config.question_count = n;
    }
    if let Some(model) = &args.author_model {
        config.author_model = model.clone();
    }
    if let Some(model) = &args.judge_model {
        config.judge_model = model.clone();
    }
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }
    if args.normalize_ranks {
        config.normalize_ranks = true;
    }
    config.validate()?;
    Ok(config)
}

/// Candidates from `--candidates` and `--model`, combined.
fn load_candidates(file: Option<&Path>, specs: &[String]) -> anyhow::Result<CandidatesPayload> {
    let from_file = file.map(CandidatesPayload::from_file).transpose()?;
    let from_flags = if specs.is_empty() {
        None
    } else {
        Some(CandidatesPayload::from_specs(specs)?)
    };

    match (from_file, from_flags) {
        (Some(file), Some(flags)) => Ok(file.merge(flags)?),
        (Some(payload), None) | (None, Some(payload)) => Ok(payload),
        (None, None) => anyhow::bail!(
            "No models provided. Pass --candidates FILE or --model ALIAS=MODEL_ID."
        ),
    }
}

fn build_llm_client(
    provider: &ProviderArgs,
    default_model: &str,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = provider.api_key.clone() {
        let client = match &provider.api_base {
            Some(base) => {
                info!(base_url = %base, "Using OpenRouter-compatible endpoint");
                OpenRouterProvider::with_custom_url(key, base.clone(), default_model.to_string())?
            }
            None => {
                info!("Using OpenRouter with specified API key");
                OpenRouterProvider::with_model(key, default_model.to_string())?
            }
        };
        Ok(Arc::new(client))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY / LITELLM_API_BASE.",
                e
            )
        })?))
    }
}

/// Prefixes a pipeline error with its kind; the underlying message stays in the chain.
fn pipeline_failure(err: AgentError) -> anyhow::Error {
    let kind = err.kind();
    anyhow::Error::new(err).context(format!("Evaluation failed ({} error)", kind))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Result written");
    Ok(())
}
