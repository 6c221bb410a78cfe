//! Pipeline orchestrator for strategy artifact generation.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Strategy and architecture completions
//! - Per-function implementation through the request queue
//! - Aggregation, local validation and external verification
//! - Stage status tracking and progress events

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::artifact::ArtifactKind;
use crate::error::{LlmError, VerifierError};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::scheduler::{
    classify_error, Classifier, ErrorClass, QueueError, QueueStatus, RequestQueue,
};
use crate::utils::extraction::extract_code_block;
use crate::verifier::{VerificationOutcome, VerificationRequest, Verifier};

use super::architecture::{Architecture, ArchitectureError, FunctionSpec};
use super::config::{ConfigError, PipelineConfig};
use super::heuristics::{check_artifact, ValidationReport};
use super::prompts;
use super::stage::{PipelineStage, StageBoard, StageId, StageTransitionError};

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Completion service error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Verification service error.
    #[error("Verifier error: {0}")]
    Verifier(#[from] VerifierError),

    /// The request queue dropped a unit.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The architecture completion could not be used.
    #[error("Architecture error: {0}")]
    Architecture(#[from] ArchitectureError),

    /// The artifact failed local heuristic checks.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The verification service rejected the artifact.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Verification is enabled but no verifier was supplied.
    #[error("Verification is enabled but no verifier is configured")]
    NoVerifier,

    /// Illegal stage transition.
    #[error("Stage error: {0}")]
    Stage(#[from] StageTransitionError),

    /// A run is already in progress on this orchestrator.
    #[error("A pipeline run is already in progress")]
    AlreadyRunning,

    /// IO error while writing output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier for the pipeline queue.
///
/// Structured 429s from either upstream service are throttling; anything
/// else falls back to the message heuristic.
pub fn pipeline_classifier() -> Classifier<PipelineError> {
    Arc::new(|err: &PipelineError| match err {
        PipelineError::Llm(e) if e.is_rate_limited() => ErrorClass::Throttled,
        PipelineError::Verifier(e) if e.is_rate_limited() => ErrorClass::Throttled,
        other => classify_error(other),
    })
}

/// Events emitted during a run for progress tracking.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Stage started.
    StageStarted {
        stage: StageId,
        timestamp: DateTime<Utc>,
    },
    /// Stage completed successfully.
    StageCompleted {
        stage: StageId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Stage failed; the run halts.
    StageFailed {
        stage: StageId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Units were submitted to the request queue.
    UnitsQueued {
        stage: StageId,
        units: usize,
        queue: QueueStatus,
        timestamp: DateTime<Utc>,
    },
    /// Every stage completed.
    PipelineCompleted {
        run_id: Uuid,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The run halted at a failed stage.
    PipelineFailed {
        run_id: Uuid,
        stage: Option<StageId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    fn stage_started(stage: StageId) -> Self {
        Self::StageStarted {
            stage,
            timestamp: Utc::now(),
        }
    }

    fn stage_completed(stage: StageId, duration_ms: u64) -> Self {
        Self::StageCompleted {
            stage,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    fn stage_failed(stage: StageId, error: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One implemented architecture function.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionImplementation {
    pub name: String,
    pub code: String,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub kind: ArtifactKind,
    pub idea: String,
    pub strategy: String,
    pub architecture: Architecture,
    pub implementations: Vec<FunctionImplementation>,
    /// The aggregated artifact source.
    pub artifact: String,
    pub validation: ValidationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOutcome>,
    pub stages: Vec<PipelineStage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineOutput {
    /// File name for the artifact, derived from the architecture name.
    pub fn artifact_file_name(&self) -> String {
        let stem: String = self
            .architecture
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        format!("{}.{}", stem, self.kind.extension())
    }

    /// Writes the artifact and a JSON run report into `dir`.
    ///
    /// Returns `(artifact_path, report_path)`.
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf), PipelineError> {
        std::fs::create_dir_all(dir)?;

        let artifact_path = dir.join(self.artifact_file_name());
        std::fs::write(&artifact_path, &self.artifact)?;

        let report_path = dir.join(format!("run-{}.json", self.run_id));
        let report = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&report_path, report)?;

        Ok((artifact_path, report_path))
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates the six stages of a generation run.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    provider: Arc<dyn LlmProvider>,
    verifier: Option<Arc<dyn Verifier>>,
    queue: RequestQueue<PipelineError>,
    board: Mutex<StageBoard>,
    running: AtomicBool,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator. Every completion and verifier call goes
    /// through one queue built from `config.rate_limit`.
    pub fn new(config: PipelineConfig, provider: Arc<dyn LlmProvider>) -> Result<Self, PipelineError> {
        config.validate()?;
        let queue =
            RequestQueue::with_classifier(config.rate_limit.clone(), pipeline_classifier())?;
        Ok(Self {
            config,
            provider,
            verifier: None,
            queue,
            board: Mutex::new(StageBoard::new()),
            running: AtomicBool::new(false),
            event_tx: None,
        })
    }

    /// Sets the verification service.
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Sends progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the stage board.
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.board().stages().to_vec()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn estimated_wait_time(&self) -> Duration {
        self.queue.estimated_wait_time()
    }

    fn board(&self) -> MutexGuard<'_, StageBoard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Runs every stage for `idea`. The first failing stage halts the run.
    pub async fn run(&self, idea: &str) -> Result<PipelineOutput, PipelineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        if self.config.verify && self.verifier.is_none() {
            return Err(PipelineError::NoVerifier);
        }

        *self.board() = StageBoard::new();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_start = Instant::now();

        tracing::info!(run_id = %run_id, kind = %self.config.kind, "Starting pipeline run");

        match self.run_stages(run_id, idea, started_at).await {
            Ok(output) => {
                self.emit(PipelineEvent::PipelineCompleted {
                    run_id,
                    duration_ms: run_start.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                })
                .await;
                tracing::info!(run_id = %run_id, artifact = %output.artifact_file_name(), "Pipeline run completed");
                Ok(output)
            }
            Err(e) => {
                let stage = self.board().failed_stage().map(|s| s.id);
                self.emit(PipelineEvent::PipelineFailed {
                    run_id,
                    stage,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                })
                .await;
                tracing::error!(run_id = %run_id, stage = ?stage, error = %e, "Pipeline run failed");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        idea: &str,
        started_at: DateTime<Utc>,
    ) -> Result<PipelineOutput, PipelineError> {
        let kind = self.config.kind;
        let tag = run_id.simple().to_string()[..8].to_string();

        // Stage 1: Strategy
        let strategy = self
            .stage(StageId::StrategyGeneration, async {
                let text = self
                    .complete(
                        format!("{}-strategy", tag),
                        StageId::StrategyGeneration,
                        prompts::strategy_messages(kind, idea),
                    )
                    .await?;
                let summary = preview(&text, 120);
                Ok::<_, PipelineError>((text, summary))
            })
            .await?;

        // Stage 2: Architecture
        let architecture = self
            .stage(StageId::ArchitectureSynthesis, async {
                let text = self
                    .complete(
                        format!("{}-architecture", tag),
                        StageId::ArchitectureSynthesis,
                        prompts::architecture_messages(kind, &strategy),
                    )
                    .await?;
                let architecture = Architecture::parse(&text)?;
                let summary = format!(
                    "{} ({} functions)",
                    architecture.name,
                    architecture.functions.len()
                );
                Ok::<_, PipelineError>((architecture, summary))
            })
            .await?;

        // Stage 3: Implementation, one unit per function
        let implementations = self
            .stage(StageId::Implementation, async {
                let handles: Vec<_> = architecture
                    .functions
                    .iter()
                    .map(|function| {
                        self.submit_completion(
                            format!("{}-impl-{}", tag, function.name),
                            StageId::Implementation,
                            prompts::implementation_messages(kind, &strategy, &architecture, function),
                        )
                    })
                    .collect();

                self.emit(PipelineEvent::UnitsQueued {
                    stage: StageId::Implementation,
                    units: handles.len(),
                    queue: self.queue.status(),
                    timestamp: Utc::now(),
                })
                .await;

                let bodies = try_join_all(handles).await?;
                let implementations: Vec<(FunctionSpec, String)> = architecture
                    .functions
                    .iter()
                    .cloned()
                    .zip(
                        bodies
                            .iter()
                            .map(|text| extract_code_block(text, kind.fence_aliases())),
                    )
                    .collect();
                let summary = format!("{} functions implemented", implementations.len());
                Ok::<_, PipelineError>((implementations, summary))
            })
            .await?;

        // Stage 4: Aggregation
        let artifact = self
            .stage(StageId::Aggregation, async {
                let text = self
                    .complete(
                        format!("{}-aggregate", tag),
                        StageId::Aggregation,
                        prompts::aggregation_messages(kind, &architecture, &implementations),
                    )
                    .await?;
                let artifact = extract_code_block(&text, kind.fence_aliases());
                let summary = format!("{} lines", artifact.lines().count());
                Ok::<_, PipelineError>((artifact, summary))
            })
            .await?;

        // Stage 5: Validation (local)
        let validation = self
            .stage(StageId::Validation, async {
                let report = check_artifact(kind, &artifact);
                for warning in report.warnings() {
                    tracing::warn!(issue = %warning, "Artifact heuristic warning");
                }
                if report.has_errors() {
                    let detail: Vec<String> =
                        report.errors().take(3).map(ToString::to_string).collect();
                    return Err(PipelineError::ValidationFailed(format!(
                        "{}: {}",
                        report.summary(),
                        detail.join("; ")
                    )));
                }
                let summary = report.summary();
                Ok::<_, PipelineError>((report, summary))
            })
            .await?;

        // Stage 6: Verification
        let verification = self
            .stage(StageId::Verification, async {
                if !self.config.verify {
                    return Ok((None, "skipped".to_string()));
                }
                let outcome = self.verify(format!("{}-verify", tag), &artifact).await?;
                if !outcome.is_success() {
                    return Err(PipelineError::VerificationFailed(describe_failure(&outcome)));
                }
                let summary = outcome.summary();
                Ok::<_, PipelineError>((Some(outcome), summary))
            })
            .await?;

        Ok(PipelineOutput {
            run_id,
            kind,
            idea: idea.to_string(),
            strategy,
            architecture,
            implementations: implementations
                .into_iter()
                .map(|(function, code)| FunctionImplementation {
                    name: function.name,
                    code,
                })
                .collect(),
            artifact,
            validation,
            verification,
            stages: self.stages(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Runs one stage: marks it running, awaits `work`, then records the
    /// outcome. `work` yields the stage value plus a short result payload.
    async fn stage<T, Fut>(&self, id: StageId, work: Fut) -> Result<T, PipelineError>
    where
        Fut: std::future::Future<Output = Result<(T, String), PipelineError>>,
    {
        self.board().start(id)?;
        tracing::info!(stage = %id, "Stage started");
        self.emit(PipelineEvent::stage_started(id)).await;
        let stage_start = Instant::now();

        match work.await {
            Ok((value, summary)) => {
                self.board().complete(id, Some(summary))?;
                let duration_ms = stage_start.elapsed().as_millis() as u64;
                tracing::info!(stage = %id, duration_ms, "Stage completed");
                self.emit(PipelineEvent::stage_completed(id, duration_ms)).await;
                Ok(value)
            }
            Err(e) => {
                self.board().fail(id, e.to_string())?;
                tracing::warn!(stage = %id, error = %e, "Stage failed");
                self.emit(PipelineEvent::stage_failed(id, e.to_string())).await;
                Err(e)
            }
        }
    }

    fn request_for(&self, stage: StageId, messages: Vec<Message>) -> GenerationRequest {
        let model = self.config.model_for(stage).unwrap_or_default();
        let request = GenerationRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        match self.config.top_p {
            Some(top_p) => request.with_top_p(top_p),
            None => request,
        }
    }

    fn submit_completion(
        &self,
        unit_id: String,
        stage: StageId,
        messages: Vec<Message>,
    ) -> crate::scheduler::UnitHandle<String, PipelineError> {
        let request = self.request_for(stage, messages);
        let provider = Arc::clone(&self.provider);
        self.queue.submit_with_id(unit_id, move || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            async move { provider.complete(request).await.map_err(PipelineError::from) }
        })
    }

    async fn complete(
        &self,
        unit_id: String,
        stage: StageId,
        messages: Vec<Message>,
    ) -> Result<String, PipelineError> {
        self.submit_completion(unit_id, stage, messages).await
    }

    async fn verify(
        &self,
        unit_id: String,
        artifact: &str,
    ) -> Result<VerificationOutcome, PipelineError> {
        let verifier = Arc::clone(self.verifier.as_ref().ok_or(PipelineError::NoVerifier)?);
        let request = VerificationRequest::new(self.config.kind, artifact);
        self.queue
            .submit_with_id(unit_id, move || {
                let verifier = Arc::clone(&verifier);
                let request = request.clone();
                async move { verifier.verify(request).await.map_err(PipelineError::from) }
            })
            .await
    }
}

fn describe_failure(outcome: &VerificationOutcome) -> String {
    match outcome {
        VerificationOutcome::Diagnostics { diagnostics, .. } => {
            let errors: Vec<&str> = diagnostics
                .iter()
                .filter(|d| d.is_error())
                .take(3)
                .map(|d| d.message.as_str())
                .collect();
            if errors.is_empty() {
                outcome.summary()
            } else {
                format!("{}: {}", outcome.summary(), errors.join("; "))
            }
        }
        VerificationOutcome::Compiled { .. } => outcome.summary(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        format!("{}...", line.chars().take(max_chars).collect::<String>())
    } else {
        line.to_string()
    }
}
