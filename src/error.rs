//! Error types for stratforge service adapters.
//!
//! Defines the error types for the external collaborators the pipeline
//! talks to:
//! - Completion API interactions
//! - Compilation / sandbox verification
//! - Local credential storage
//!
//! Queue and pipeline errors live next to the code that raises them
//! (`scheduler::QueueError`, `pipeline::PipelineError`).

use thiserror::Error;

use crate::scheduler::QueueError;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set STRATFORGE_API_KEY or OPENROUTER_API_KEY")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty completion from model '{0}'")]
    EmptyCompletion(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl LlmError {
    /// Returns true when the upstream service signalled "slow down".
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ApiError { code: 429, .. }
        )
    }
}

/// Errors that can occur while talking to the compilation/execution service.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Verifier endpoint not configured: set STRATFORGE_VERIFIER_URL")]
    NotConfigured,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse verifier response: {0}")]
    ParseError(String),

    #[error("Verifier API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl VerifierError {
    /// Returns true when the verifier rejected the call with HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VerifierError::ApiError { code: 429, .. })
    }
}

/// Errors that can occur during credential store operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Invalid credential name '{0}': must be non-empty and contain no whitespace")]
    InvalidName(String),

    #[error("Credential store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_rate_limit_detection() {
        assert!(LlmError::RateLimited("slow down".to_string()).is_rate_limited());
        assert!(LlmError::ApiError {
            code: 429,
            message: "quota".to_string()
        }
        .is_rate_limited());
        assert!(!LlmError::ApiError {
            code: 500,
            message: "boom".to_string()
        }
        .is_rate_limited());
        assert!(!LlmError::RequestFailed("connection refused".to_string()).is_rate_limited());
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::ApiError {
            code: 401,
            message: "bad key".to_string(),
        };
        assert_eq!(err.to_string(), "API error (401): bad key");

        let err = VerifierError::ApiError {
            code: 429,
            message: "busy".to_string(),
        };
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("429"));

        let err = CredentialError::InvalidName("my key".to_string());
        assert!(err.to_string().contains("my key"));
    }
}
