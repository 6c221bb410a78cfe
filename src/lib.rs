//! stratforge: rate-limited trading strategy code generator.
//!
//! This library provides a rate-limited retry queue for outbound API calls
//! and a six-stage pipeline that turns a trading idea into a Python script
//! or Solidity contract.

// Core modules
pub mod artifact;
pub mod cli;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod scheduler;
pub mod utils;
pub mod verifier;

// Re-export commonly used error types
pub use error::{CredentialError, LlmError, VerifierError};
