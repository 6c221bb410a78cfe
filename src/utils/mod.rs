//! Shared utility functions for stratforge.
//!
//! This module provides common utilities used across multiple modules,
//! including JSON and code extraction from completion responses.

pub mod extraction;

pub use extraction::{extract_code_block, extract_json_object, find_matching_brace, ExtractionError};
