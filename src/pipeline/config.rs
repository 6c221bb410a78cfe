//! Pipeline configuration for the orchestrator.
//!
//! This module provides configuration options for a generation run: the
//! artifact kind, per-stage models, sampling settings, the output directory
//! and the rate limit applied to every outbound call.

use std::path::PathBuf;

use crate::artifact::ArtifactKind;
use crate::llm::DEFAULT_MODEL;
use crate::scheduler::config::{parse_env_bool, parse_env_value};
use crate::scheduler::RateLimitConfig;

use super::stage::StageId;

pub use crate::scheduler::ConfigError;

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Language of the generated artifact.
    pub kind: ArtifactKind,

    // LLM settings
    /// Model for the strategy generation stage.
    pub strategy_model: String,
    /// Model for the architecture synthesis stage.
    pub architecture_model: String,
    /// Model for per-function implementation.
    pub implementation_model: String,
    /// Model for the aggregation stage.
    pub aggregation_model: String,
    /// Temperature for LLM generation.
    pub temperature: f64,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Nucleus sampling cutoff; left to the provider when `None`.
    pub top_p: Option<f64>,

    /// Directory artifacts and run reports are written to.
    pub output_dir: PathBuf,
    /// Whether to run the external verification stage.
    pub verify: bool,

    /// Budget and retry settings for the request queue.
    pub rate_limit: RateLimitConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kind: ArtifactKind::Python,
            strategy_model: DEFAULT_MODEL.to_string(),
            architecture_model: DEFAULT_MODEL.to_string(),
            implementation_model: DEFAULT_MODEL.to_string(),
            aggregation_model: DEFAULT_MODEL.to_string(),
            temperature: 0.4,
            max_tokens: 4096,
            top_p: None,
            output_dir: PathBuf::from("./generated"),
            verify: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_ARTIFACT_KIND`: `python` or `solidity` (default: python)
    /// - `PIPELINE_MODEL`: Model for every stage (default: openai/gpt-4o-mini)
    /// - `PIPELINE_STRATEGY_MODEL`, `PIPELINE_ARCHITECTURE_MODEL`,
    ///   `PIPELINE_IMPLEMENTATION_MODEL`, `PIPELINE_AGGREGATION_MODEL`: Per-stage overrides
    /// - `PIPELINE_TEMPERATURE`: LLM temperature (default: 0.4)
    /// - `PIPELINE_MAX_TOKENS`: Max tokens per completion (default: 4096)
    /// - `PIPELINE_TOP_P`: Nucleus sampling cutoff (default: unset)
    /// - `PIPELINE_OUTPUT_DIR`: Output directory (default: ./generated)
    /// - `PIPELINE_VERIFY`: Run external verification (default: true)
    /// - `RATE_LIMIT_*`: See [`RateLimitConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            rate_limit: RateLimitConfig::from_env()?,
            ..Self::default()
        };

        if let Ok(val) = std::env::var("PIPELINE_ARTIFACT_KIND") {
            config.kind = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "PIPELINE_ARTIFACT_KIND".to_string(),
                message,
            })?;
        }

        // LLM settings
        if let Ok(val) = std::env::var("PIPELINE_MODEL") {
            config = config.with_model(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_STRATEGY_MODEL") {
            config.strategy_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_ARCHITECTURE_MODEL") {
            config.architecture_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_IMPLEMENTATION_MODEL") {
            config.implementation_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_AGGREGATION_MODEL") {
            config.aggregation_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "PIPELINE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "PIPELINE_MAX_TOKENS")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_TOP_P") {
            config.top_p = Some(parse_env_value(&val, "PIPELINE_TOP_P")?);
        }

        if let Ok(val) = std::env::var("PIPELINE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PIPELINE_VERIFY") {
            config.verify = parse_env_bool(&val, "PIPELINE_VERIFY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, model) in [
            ("strategy_model", &self.strategy_model),
            ("architecture_model", &self.architecture_model),
            ("implementation_model", &self.implementation_model),
            ("aggregation_model", &self.aggregation_model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(ConfigError::ValidationFailed(
                    "top_p must be in (0.0, 1.0]".to_string(),
                ));
            }
        }

        self.rate_limit.validate()
    }

    /// Model used for a completion stage; `None` for local or verifier stages.
    pub fn model_for(&self, stage: StageId) -> Option<&str> {
        match stage {
            StageId::StrategyGeneration => Some(&self.strategy_model),
            StageId::ArchitectureSynthesis => Some(&self.architecture_model),
            StageId::Implementation => Some(&self.implementation_model),
            StageId::Aggregation => Some(&self.aggregation_model),
            StageId::Validation | StageId::Verification => None,
        }
    }

    /// Builder method to set the artifact kind.
    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder method to use one model for every completion stage.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.strategy_model = model.clone();
        self.architecture_model = model.clone();
        self.implementation_model = model.clone();
        self.aggregation_model = model;
        self
    }

    /// Builder method to set the implementation model only.
    pub fn with_implementation_model(mut self, model: impl Into<String>) -> Self {
        self.implementation_model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Builder method to set max tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder method to set the nucleus sampling cutoff.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to enable or disable external verification.
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    /// Builder method to set the rate limit.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}
