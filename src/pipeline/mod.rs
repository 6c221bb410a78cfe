//! Six-stage generation pipeline for trading strategy artifacts.
//!
//! A run takes a free-form trading idea and carries it through:
//!
//! 1. **Strategy Generation**: the idea is expanded into a concrete strategy
//! 2. **Architecture Synthesis**: the strategy becomes a JSON architecture
//!    naming state variables and functions
//! 3. **Implementation**: every function is generated as its own request
//! 4. **Aggregation**: the implementations are merged into one artifact
//! 5. **Validation**: local heuristic checks on the merged source
//! 6. **Verification**: the artifact is compiled or executed remotely
//!
//! Stages run strictly in order; a failed stage halts the run and leaves
//! every later stage pending. All completion and verifier calls go through
//! one [`RequestQueue`](crate::scheduler::RequestQueue), so the whole run
//! shares a single rate budget.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratforge::artifact::ArtifactKind;
//! use stratforge::llm::CompletionClient;
//! use stratforge::pipeline::{PipelineConfig, PipelineOrchestrator};
//!
//! let config = PipelineConfig::from_env()?
//!     .with_kind(ArtifactKind::Solidity)
//!     .with_verification(false);
//! let provider = Arc::new(CompletionClient::from_env()?);
//!
//! let orchestrator = PipelineOrchestrator::new(config, provider)?;
//! let output = orchestrator.run("momentum breakout on ETH/USDC").await?;
//! output.write_to(std::path::Path::new("./generated"))?;
//! ```

pub mod architecture;
pub mod config;
pub mod heuristics;
pub mod orchestrator;
pub mod prompts;
pub mod stage;

// Re-export main types for convenience
pub use architecture::{Architecture, ArchitectureError, FunctionSpec, StateVariable};
pub use config::{ConfigError, PipelineConfig};
pub use heuristics::{check_artifact, Issue, Severity, ValidationReport};
pub use orchestrator::{
    pipeline_classifier, FunctionImplementation, PipelineError, PipelineEvent,
    PipelineOrchestrator, PipelineOutput,
};
pub use stage::{PipelineStage, StageBoard, StageId, StageStatus, StageTransitionError};
