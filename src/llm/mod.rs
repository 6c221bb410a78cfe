//! Completion service integration for stratforge.
//!
//! The pipeline talks to any OpenAI-compatible chat completion endpoint
//! through the [`LlmProvider`] trait. [`CompletionClient`] is the HTTP
//! implementation; tests substitute scripted providers.
//!
//! ```ignore
//! use stratforge::llm::{CompletionClient, GenerationRequest, LlmProvider, Message};
//!
//! let client = CompletionClient::from_env()?;
//! let request = GenerationRequest::new(
//!     "openai/gpt-4o-mini",
//!     vec![Message::system("You are a quant."), Message::user("Describe a mean-reversion strategy")],
//! );
//! let text = client.complete(request).await?;
//! ```
//!
//! Clients never retry on their own. HTTP 429 surfaces as
//! [`crate::error::LlmError::RateLimited`] so the request queue can back off.

pub mod client;

pub use client::{
    Choice, CompletionClient, GenerationRequest, GenerationResponse, LlmConfig, LlmProvider,
    Message, Usage, DEFAULT_API_BASE, DEFAULT_MODEL,
};
