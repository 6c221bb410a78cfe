//! Client for the external compilation / execution service.
//!
//! Solidity artifacts are sent to a compiler endpoint and come back either
//! as diagnostics or as bytecode plus ABI. Python artifacts are sent to a
//! sandbox endpoint and come back as diagnostics. The service itself is an
//! external collaborator; this module only speaks its request/response
//! contract.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::artifact::ArtifactKind;
use crate::error::VerifierError;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 90;

/// Source submitted for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Language of `source`.
    pub language: ArtifactKind,
    /// Full artifact text.
    pub source: String,
    /// Service-specific settings (compiler version, optimizer, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl VerificationRequest {
    pub fn new(language: ArtifactKind, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// A single compiler or sandbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// "error", "warning" or "info" as reported by the service.
    #[serde(default = "default_severity")]
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

fn default_severity() -> String {
    "error".to_string()
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case("error")
    }
}

/// What the service said about an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Checked without producing a build artifact.
    Diagnostics {
        success: bool,
        diagnostics: Vec<Diagnostic>,
    },
    /// Compiled successfully.
    Compiled {
        bytecode: String,
        abi: serde_json::Value,
    },
}

impl VerificationOutcome {
    /// Whether the artifact passed verification.
    pub fn is_success(&self) -> bool {
        match self {
            VerificationOutcome::Diagnostics {
                success,
                diagnostics,
            } => *success && !diagnostics.iter().any(Diagnostic::is_error),
            VerificationOutcome::Compiled { bytecode, .. } => !bytecode.is_empty(),
        }
    }

    /// One-line summary for logs and CLI output.
    pub fn summary(&self) -> String {
        match self {
            VerificationOutcome::Diagnostics { diagnostics, .. } => {
                let errors = diagnostics.iter().filter(|d| d.is_error()).count();
                format!(
                    "{} ({} errors, {} other diagnostics)",
                    if self.is_success() { "passed" } else { "failed" },
                    errors,
                    diagnostics.len() - errors
                )
            }
            VerificationOutcome::Compiled { bytecode, .. } => {
                format!("compiled ({} bytes of bytecode)", bytecode.trim_start_matches("0x").len() / 2)
            }
        }
    }
}

/// Trait for services that can verify an artifact.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerifierError>;
}

/// Endpoint settings for the HTTP verifier.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Base URL; `/compile` and `/execute` are appended per language.
    pub endpoint: String,
}

impl VerifierConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Reads `STRATFORGE_VERIFIER_URL`.
    pub fn from_env() -> Result<Self, VerifierError> {
        std::env::var("STRATFORGE_VERIFIER_URL")
            .map(Self::new)
            .map_err(|_| VerifierError::NotConfigured)
    }
}

/// Wire shape of the service response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiVerifyResponse {
    Compiled {
        bytecode: String,
        #[serde(default)]
        abi: serde_json::Value,
    },
    Diagnostics {
        success: bool,
        #[serde(default)]
        diagnostics: Vec<Diagnostic>,
    },
}

impl From<ApiVerifyResponse> for VerificationOutcome {
    fn from(response: ApiVerifyResponse) -> Self {
        match response {
            ApiVerifyResponse::Compiled { bytecode, abi } => {
                VerificationOutcome::Compiled { bytecode, abi }
            }
            ApiVerifyResponse::Diagnostics {
                success,
                diagnostics,
            } => VerificationOutcome::Diagnostics {
                success,
                diagnostics,
            },
        }
    }
}

/// HTTP JSON client for the verification service.
pub struct HttpVerifier {
    client: Client,
    config: VerifierConfig,
}

impl HttpVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            config,
        }
    }

    pub fn from_env() -> Result<Self, VerifierError> {
        Ok(Self::new(VerifierConfig::from_env()?))
    }

    /// Full URL the request for `kind` is posted to.
    pub fn route_for(&self, kind: ArtifactKind) -> String {
        let route = match kind {
            ArtifactKind::Solidity => "compile",
            ArtifactKind::Python => "execute",
        };
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), route)
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn verify(
        &self,
        request: VerificationRequest,
    ) -> Result<VerificationOutcome, VerifierError> {
        let url = self.route_for(request.language);
        tracing::debug!(url = %url, language = %request.language, "Sending artifact for verification");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| VerifierError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(VerifierError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: ApiVerifyResponse = response
            .json()
            .await
            .map_err(|e| VerifierError::ParseError(e.to_string()))?;

        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compiled_response() {
        let raw = r#"{"bytecode": "0x6080604052", "abi": [{"type": "function", "name": "rebalance"}]}"#;
        let outcome: VerificationOutcome = serde_json::from_str::<ApiVerifyResponse>(raw)
            .expect("should parse")
            .into();

        assert!(outcome.is_success());
        assert!(outcome.summary().contains("5 bytes"));
    }

    #[test]
    fn test_parse_diagnostics_response() {
        let raw = r#"{
            "success": false,
            "diagnostics": [
                {"severity": "error", "message": "Undeclared identifier", "line": 12},
                {"severity": "warning", "message": "Unused variable"}
            ]
        }"#;
        let outcome: VerificationOutcome = serde_json::from_str::<ApiVerifyResponse>(raw)
            .expect("should parse")
            .into();

        assert!(!outcome.is_success());
        assert!(outcome.summary().starts_with("failed (1 errors, 1 other"));
    }

    #[test]
    fn test_success_flag_with_error_diagnostic_fails() {
        let outcome = VerificationOutcome::Diagnostics {
            success: true,
            diagnostics: vec![Diagnostic {
                severity: "ERROR".to_string(),
                message: "Traceback".to_string(),
                line: None,
            }],
        };
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_request_serialization() {
        let request = VerificationRequest::new(ArtifactKind::Solidity, "contract A {}")
            .with_settings(serde_json::json!({"optimizer": true}));
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["language"], "solidity");
        assert_eq!(json["settings"]["optimizer"], true);

        let bare = serde_json::to_string(&VerificationRequest::new(ArtifactKind::Python, "x = 1"))
            .expect("serialize");
        assert!(!bare.contains("settings"));
    }

    #[test]
    fn test_routes_per_language() {
        let verifier = HttpVerifier::new(VerifierConfig::new("http://localhost:8545/"));
        assert_eq!(
            verifier.route_for(ArtifactKind::Solidity),
            "http://localhost:8545/compile"
        );
        assert_eq!(
            verifier.route_for(ArtifactKind::Python),
            "http://localhost:8545/execute"
        );
    }

    #[tokio::test]
    async fn test_verify_connection_error() {
        let verifier = HttpVerifier::new(VerifierConfig::new("http://localhost:65535"));
        let result = verifier
            .verify(VerificationRequest::new(ArtifactKind::Python, "print(1)"))
            .await;
        assert!(matches!(result, Err(VerifierError::RequestFailed(_))));
    }
}
