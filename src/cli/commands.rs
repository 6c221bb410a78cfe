//! CLI command definitions for stratforge.
//!
//! `generate` runs the full pipeline for one trading idea, `verify` sends
//! an existing artifact to the verification service, and `keys` manages
//! the local credential file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::artifact::ArtifactKind;
use crate::credentials::{self, mask_secret, CredentialStore, FileCredentialStore};
use crate::error::VerifierError;
use crate::llm::{CompletionClient, LlmConfig, LlmProvider};
use crate::pipeline::{
    PipelineConfig, PipelineEvent, PipelineOrchestrator, PipelineStage, StageId, StageStatus,
};
use crate::scheduler::{classify_error, ErrorClass, QueueStatus, RateLimitConfig, RequestQueue};
use crate::verifier::{HttpVerifier, VerificationRequest, Verifier, VerifierConfig};

/// Default output directory for generated artifacts.
const DEFAULT_OUTPUT_DIR: &str = "./generated";

/// Trading strategy code generator.
#[derive(Parser)]
#[command(name = "stratforge")]
#[command(about = "Generate trading strategy code through a rate-limited LLM pipeline")]
#[command(version)]
#[command(
    long_about = "stratforge turns a trading idea into a Python script or Solidity contract.\n\nThe idea is expanded into a strategy, designed into an architecture, implemented function by function, merged, checked, and verified. Every outbound call goes through one rate-limited queue.\n\nExample usage:\n  stratforge generate --idea \"mean reversion on ETH/USDC\" --kind solidity --output ./generated"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Credential file (default: ~/.stratforge/credentials.json).
    #[arg(long, global = true, env = "STRATFORGE_CREDENTIALS")]
    pub credentials: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate a strategy artifact from a trading idea.
    #[command(alias = "gen")]
    Generate(GenerateArgs),

    /// Send an existing artifact to the verification service.
    Verify(VerifyArgs),

    /// Manage stored API keys and endpoints.
    Keys(KeysArgs),
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// The trading idea to implement.
    #[arg(short = 'i', long)]
    pub idea: String,

    /// Artifact language.
    #[arg(short = 'k', long, value_enum, default_value_t = ArtifactKind::Python)]
    pub kind: ArtifactKind,

    /// Model for every stage (OpenRouter format). Defaults to PIPELINE_MODEL or the built-in default.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Output directory for the artifact and run report.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: String,

    /// Requests per minute allowed across all stages.
    #[arg(long)]
    pub rpm: Option<u32>,

    /// Minimum spacing between requests and backoff base, in seconds.
    #[arg(long)]
    pub retry_delay_secs: Option<f64>,

    /// Maximum throttling retries per request.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Skip the external verification stage.
    #[arg(long)]
    pub skip_verification: bool,

    /// Output JSON to stdout instead of interactive progress.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Completion API key (falls back to the credential store, then STRATFORGE_API_KEY / OPENROUTER_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Verification service URL (falls back to the credential store).
    #[arg(long, env = "STRATFORGE_VERIFIER_URL")]
    pub verifier_url: Option<String>,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Artifact file to verify.
    #[arg(short = 'f', long)]
    pub file: PathBuf,

    /// Artifact language (inferred from the file extension when omitted).
    #[arg(short = 'k', long, value_enum)]
    pub kind: Option<ArtifactKind>,

    /// Verification service URL (falls back to the credential store).
    #[arg(long, env = "STRATFORGE_VERIFIER_URL")]
    pub verifier_url: Option<String>,

    /// Output JSON to stdout.
    #[arg(short = 'j', long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum KeysSubcommand {
    /// Store a secret.
    Set { name: String, value: String },
    /// Show a stored secret (masked unless --reveal).
    Get {
        name: String,
        #[arg(long)]
        reveal: bool,
    },
    /// Remove a stored secret.
    Clear { name: String },
    /// List stored secret names.
    List,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let store = FileCredentialStore::new(
        cli.credentials
            .unwrap_or_else(FileCredentialStore::default_path),
    );

    match cli.command {
        Commands::Generate(args) => run_generate_command(args, &store).await,
        Commands::Verify(args) => run_verify_command(args, &store).await,
        Commands::Keys(args) => run_keys_command(args, &store),
    }
}

// ============================================================================
// Generate Command Implementation
// ============================================================================

/// JSON output structure for generation results.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub status: String,
    pub kind: ArtifactKind,
    pub model: String,
    pub artifact_path: Option<String>,
    pub report_path: Option<String>,
    pub error: Option<String>,
    pub stages: Vec<PipelineStage>,
    pub queue: QueueStatus,
    pub total_duration_ms: u64,
}

fn build_llm_client(
    api_key: Option<String>,
    store: &dyn CredentialStore,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let stored = match api_key {
        Some(key) => Some(key),
        None => store.get(credentials::API_KEY)?,
    };

    let config = match stored {
        Some(key) => {
            let mut config = LlmConfig::new(key);
            if let Ok(base) = std::env::var("STRATFORGE_API_BASE") {
                config = config.with_api_base(base);
            }
            config
        }
        None => LlmConfig::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Provide --api-key, run \
                 `stratforge keys set {} <KEY>`, or set STRATFORGE_API_KEY.",
                e,
                credentials::API_KEY
            )
        })?,
    };

    let client = CompletionClient::new(config);
    info!(api_base = %client.api_base(), api_key = %client.api_key_masked(), "Using completion endpoint");
    Ok(Arc::new(client))
}

fn resolve_verifier_url(
    url: Option<String>,
    store: &dyn CredentialStore,
) -> anyhow::Result<Option<String>> {
    match url {
        Some(url) => Ok(Some(url)),
        None => Ok(store.get(credentials::VERIFIER_URL)?),
    }
}

fn build_pipeline_config(args: &GenerateArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?
        .with_kind(args.kind)
        .with_output_dir(&args.output)
        .with_verification(!args.skip_verification);

    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }

    let mut rate_limit = config.rate_limit.clone();
    if let Some(rpm) = args.rpm {
        rate_limit = rate_limit.with_requests_per_minute(rpm);
    }
    if let Some(secs) = args.retry_delay_secs {
        let delay = Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow::anyhow!("--retry-delay-secs must be a non-negative number"))?;
        rate_limit = rate_limit.with_retry_delay(delay);
    }
    if let Some(retries) = args.max_retries {
        rate_limit = rate_limit.with_max_retries(retries);
    }

    let config = config.with_rate_limit(rate_limit);
    config.validate()?;
    Ok(config)
}

/// One progress line for an event, or `None` for events not shown.
fn render_event(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::StageStarted { stage, .. } => Some(format!(
            "[{}/{}] {} ... running",
            stage.index() + 1,
            StageId::ALL.len(),
            stage
        )),
        PipelineEvent::StageCompleted {
            stage, duration_ms, ..
        } => Some(format!(
            "[{}/{}] {} ... completed in {:.1}s",
            stage.index() + 1,
            StageId::ALL.len(),
            stage,
            *duration_ms as f64 / 1000.0
        )),
        PipelineEvent::StageFailed { stage, error, .. } => Some(format!(
            "[{}/{}] {} ... {}: {}",
            stage.index() + 1,
            StageId::ALL.len(),
            stage,
            StageStatus::Failed,
            error
        )),
        PipelineEvent::UnitsQueued { units, queue, .. } => {
            Some(format!("      {} requests queued ({})", units, queue))
        }
        PipelineEvent::PipelineCompleted { .. } | PipelineEvent::PipelineFailed { .. } => None,
    }
}

async fn run_generate_command(args: GenerateArgs, store: &dyn CredentialStore) -> anyhow::Result<()> {
    let config = build_pipeline_config(&args)?;
    let provider = build_llm_client(args.api_key.clone(), store)?;

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(64);
    let mut orchestrator = PipelineOrchestrator::new(config.clone(), provider)?.with_events(event_tx);

    if config.verify {
        let Some(url) = resolve_verifier_url(args.verifier_url.clone(), store)? else {
            anyhow::bail!(
                "Verification is enabled but no verifier URL is set. Pass --verifier-url, run \
                 `stratforge keys set {} <URL>`, or use --skip-verification.",
                credentials::VERIFIER_URL
            );
        };
        orchestrator = orchestrator.with_verifier(Arc::new(HttpVerifier::new(VerifierConfig::new(url))));
    }

    let quiet = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if quiet {
                continue;
            }
            if let Some(line) = render_event(&event) {
                eprintln!("{}", line);
            }
        }
    });

    info!(
        kind = %config.kind,
        rpm = config.rate_limit.requests_per_minute,
        retry_delay_secs = config.rate_limit.retry_delay.as_secs_f64(),
        "Starting generation"
    );
    let start = Instant::now();
    let result = orchestrator.run(&args.idea).await;
    let stages = orchestrator.stages();
    let queue = orchestrator.queue_status();
    drop(orchestrator);
    let _ = printer.await;

    let mut output = GenerationOutput {
        status: "success".to_string(),
        kind: config.kind,
        model: config.strategy_model.clone(),
        artifact_path: None,
        report_path: None,
        error: None,
        stages,
        queue,
        total_duration_ms: start.elapsed().as_millis() as u64,
    };

    match result {
        Ok(run) => {
            let (artifact_path, report_path) = run.write_to(Path::new(&args.output))?;
            output.artifact_path = Some(artifact_path.display().to_string());
            output.report_path = Some(report_path.display().to_string());
        }
        Err(e) => {
            warn!(error = %e, "Generation failed");
            output.status = "failed".to_string();
            output.error = Some(e.to_string());
        }
    }

    if args.json {
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print_stage_board(&output.stages);
        match (&output.artifact_path, &output.report_path) {
            (Some(artifact), Some(report)) => {
                println!("\nArtifact: {}", artifact);
                println!("Report:   {}", report);
            }
            _ => println!("\nNo artifact written."),
        }
        println!("Queue:    {}", output.queue);
    }

    match output.error {
        Some(error) => anyhow::bail!("Generation failed: {}", error),
        None => Ok(()),
    }
}

fn print_stage_board(stages: &[PipelineStage]) {
    println!();
    for stage in stages {
        let detail = stage
            .error
            .as_deref()
            .or(stage.result.as_deref())
            .unwrap_or("");
        println!("  {:<24} {:<10} {}", stage.id.to_string(), stage.status.to_string(), detail);
    }
}

// ============================================================================
// Verify Command Implementation
// ============================================================================

async fn run_verify_command(args: VerifyArgs, store: &dyn CredentialStore) -> anyhow::Result<()> {
    let kind = match args.kind.or_else(|| ArtifactKind::from_path(&args.file)) {
        Some(kind) => kind,
        None => anyhow::bail!(
            "Cannot infer artifact kind from '{}'; pass --kind",
            args.file.display()
        ),
    };
    let source = std::fs::read_to_string(&args.file)?;

    let Some(url) = resolve_verifier_url(args.verifier_url.clone(), store)? else {
        anyhow::bail!(
            "No verifier URL set. Pass --verifier-url or run `stratforge keys set {} <URL>`.",
            credentials::VERIFIER_URL
        );
    };
    let verifier = Arc::new(HttpVerifier::new(VerifierConfig::new(url)));

    let queue: RequestQueue<VerifierError> = RequestQueue::with_classifier(
        RateLimitConfig::from_env()?,
        Arc::new(|e: &VerifierError| {
            if e.is_rate_limited() {
                ErrorClass::Throttled
            } else {
                classify_error(e)
            }
        }),
    )?;

    let request = VerificationRequest::new(kind, source);
    let outcome = queue
        .submit(move || {
            let verifier = Arc::clone(&verifier);
            let request = request.clone();
            async move { verifier.verify(request).await }
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}: {}", args.file.display(), outcome.summary());
    }

    if !outcome.is_success() {
        anyhow::bail!("Verification failed: {}", outcome.summary());
    }
    Ok(())
}

// ============================================================================
// Keys Command Implementation
// ============================================================================

fn run_keys_command(args: KeysArgs, store: &dyn CredentialStore) -> anyhow::Result<()> {
    match args.command {
        KeysSubcommand::Set { name, value } => {
            store.set(&name, &value)?;
            println!("Stored '{}'", name);
        }
        KeysSubcommand::Get { name, reveal } => match store.get(&name)? {
            Some(value) if reveal => println!("{}", value),
            Some(value) => println!("{}", mask_secret(&value)),
            None => anyhow::bail!("No credential named '{}'", name),
        },
        KeysSubcommand::Clear { name } => {
            if store.clear(&name)? {
                println!("Cleared '{}'", name);
            } else {
                println!("No credential named '{}'", name);
            }
        }
        KeysSubcommand::List => {
            for name in store.names()? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
