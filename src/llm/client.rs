//! OpenAI-compatible completion client.
//!
//! Works against any `/chat/completions` endpoint (OpenRouter, OpenAI,
//! DeepSeek, a local LiteLLM proxy). The client performs a single request
//! per call; throttling and retry are the request queue's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Default model used when a request leaves the model empty.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier to use for generation. Empty means the client default.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter (0.0 - 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the top_p for this request.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated choices/completions.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;

    /// Generate and return the first choice's text, failing on an empty completion.
    async fn complete(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let model = request.model.clone();
        let response = self.generate(request).await?;
        if let Some(text) = response.first_content().filter(|t| !t.trim().is_empty()) {
            return Ok(text.to_string());
        }
        Err(LlmError::EmptyCompletion(if model.is_empty() {
            response.model
        } else {
            model
        }))
    }
}

/// Connection settings for a completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL, without the `/chat/completions` suffix.
    pub api_base: String,
    /// Bearer token.
    pub api_key: String,
    /// Model used when a request leaves the model empty.
    pub default_model: String,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Reads the completion endpoint from the environment.
    ///
    /// - `STRATFORGE_API_BASE`: Base URL (default: OpenRouter)
    /// - `STRATFORGE_API_KEY` or `OPENROUTER_API_KEY`: API key (required)
    /// - `STRATFORGE_DEFAULT_MODEL`: Default model
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("STRATFORGE_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| LlmError::MissingApiKey)?;

        let mut config = Self::new(api_key);
        if let Ok(base) = std::env::var("STRATFORGE_API_BASE") {
            config.api_base = base;
        }
        if let Ok(model) = std::env::var("STRATFORGE_DEFAULT_MODEL") {
            config.default_model = model;
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct CompletionClient {
    http_client: Client,
    config: LlmConfig,
}

impl CompletionClient {
    /// Create a new client from explicit configuration.
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            config,
        }
    }

    /// Create a new client from environment variables.
    pub fn from_env() -> Result<Self, LlmError> {
        Ok(Self::new(LlmConfig::from_env()?))
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.config.api_base
    }

    /// Get the default model.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        crate::credentials::mask_secret(&self.config.api_key)
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Error response from the API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-success HTTP status and body into an `LlmError`.
fn error_from_status(status_code: u16, body: String) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    if status_code == 429 {
        LlmError::RateLimited(message)
    } else {
        LlmError::ApiError {
            code: status_code,
            message,
        }
    }
}

fn into_generation_response(api_response: ApiResponse) -> GenerationResponse {
    let choices = api_response
        .choices
        .into_iter()
        .map(|choice| Choice {
            index: choice.index,
            message: Message {
                role: choice.message.role,
                content: choice.message.content.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
        .collect();

    let usage = api_response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    GenerationResponse {
        id: api_response.id,
        model: api_response.model,
        choices,
        usage,
    }
}

#[async_trait]
impl LlmProvider for CompletionClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        };

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        tracing::debug!(model = %api_request.model, url = %url, "Sending completion request");

        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", "https://stratforge.local")
            .header("X-Title", "stratforge")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status.as_u16(), error_text));
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        Ok(into_generation_response(api_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are a quant.");
        assert_eq!(system.role, "system");
        assert_eq!(system.content, "You are a quant.");

        assert_eq!(Message::user("hi").role, "user");
        assert_eq!(Message::assistant("hello").role, "assistant");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gpt-4o", vec![Message::user("test")])
            .with_temperature(0.2)
            .with_max_tokens(800)
            .with_top_p(0.9);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(800));
        assert_eq!(request.top_p, Some(0.9));
    }

    #[test]
    fn test_api_request_serialization_skips_none() {
        let request = ApiRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::user("test")],
            temperature: Some(0.7),
            max_tokens: None,
            top_p: None,
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("top_p"));
    }

    #[test]
    fn test_error_from_status_429_is_rate_limited() {
        let body = r#"{"error":{"message":"Rate limit reached for requests"}}"#.to_string();
        let err = error_from_status(429, body);
        assert!(matches!(err, LlmError::RateLimited(ref m) if m.contains("Rate limit reached")));
    }

    #[test]
    fn test_error_from_status_raw_body() {
        let err = error_from_status(502, "bad gateway".to_string());
        match err {
            LlmError::ApiError { code, message } => {
                assert_eq!(code, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_with_null_content() {
        let raw = r#"{
            "id": "gen-1",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": null}, "finish_reason": null}]
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).expect("should parse");
        let response = into_generation_response(parsed);
        assert_eq!(response.first_content(), Some(""));
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[test]
    fn test_client_config() {
        let client = CompletionClient::new(
            LlmConfig::new("sk-test-1234567890")
                .with_api_base("http://localhost:4000")
                .with_default_model("deepseek/deepseek-chat"),
        );
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.default_model(), "deepseek/deepseek-chat");
        assert_eq!(client.api_key_masked(), "sk-t...7890");
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = CompletionClient::new(
            LlmConfig::new("key").with_api_base("http://localhost:65535"),
        );

        let request = GenerationRequest::new("gpt-4o", vec![Message::user("test")]);
        let result = client.generate(request).await;

        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
