//! Structured architecture produced by the synthesis stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::extraction::{extract_json_object, ExtractionError};

/// Errors raised while reading an architecture out of a completion.
#[derive(Debug, Error)]
pub enum ArchitectureError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Architecture JSON does not match the expected shape: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid architecture: {0}")]
    Invalid(String),
}

/// A piece of persistent state (contract storage or module-level variable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub description: String,
}

/// One function to implement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared signature, in the target language.
    #[serde(default)]
    pub signature: String,
}

/// Contract or module layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    #[serde(alias = "contract_name", alias = "module_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: Vec<StateVariable>,
    pub functions: Vec<FunctionSpec>,
}

impl Architecture {
    /// Extracts and validates an architecture from completion text.
    pub fn parse(response: &str) -> Result<Self, ArchitectureError> {
        let json = extract_json_object(response)?;
        let architecture: Architecture = serde_json::from_str(&json)?;
        architecture.validate()?;
        Ok(architecture)
    }

    pub fn validate(&self) -> Result<(), ArchitectureError> {
        if self.name.trim().is_empty() {
            return Err(ArchitectureError::Invalid("name cannot be empty".to_string()));
        }
        if self.functions.is_empty() {
            return Err(ArchitectureError::Invalid(
                "at least one function is required".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for function in &self.functions {
            if !is_identifier(&function.name) {
                return Err(ArchitectureError::Invalid(format!(
                    "'{}' is not a valid function name",
                    function.name
                )));
            }
            if !seen.insert(function.name.as_str()) {
                return Err(ArchitectureError::Invalid(format!(
                    "duplicate function '{}'",
                    function.name
                )));
            }
        }
        Ok(())
    }

    /// Compact JSON for embedding in later prompts.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.name.clone())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"Here is the design:
```json
{
  "contract_name": "GridTrader",
  "description": "Places buy and sell orders on a fixed price grid.",
  "state": [{"name": "gridSpacing", "type": "uint256"}],
  "functions": [
    {"name": "placeOrders", "description": "Seed the grid", "signature": "function placeOrders() external"},
    {"name": "rebalance", "description": "Shift the grid"}
  ]
}
```"#;

    #[test]
    fn test_parse_fenced_architecture() {
        let arch = Architecture::parse(SAMPLE).unwrap();
        assert_eq!(arch.name, "GridTrader");
        assert_eq!(arch.state[0].ty, "uint256");
        assert_eq!(arch.functions.len(), 2);
        assert_eq!(arch.functions[1].signature, "");
    }

    #[test]
    fn test_rejects_empty_functions() {
        let err = Architecture::parse(r#"{"name": "Empty", "functions": []}"#).unwrap_err();
        assert!(err.to_string().contains("at least one function"));
    }

    #[test]
    fn test_rejects_duplicate_and_invalid_names() {
        let dup = r#"{"name": "A", "functions": [{"name": "run"}, {"name": "run"}]}"#;
        assert!(Architecture::parse(dup)
            .unwrap_err()
            .to_string()
            .contains("duplicate"));

        let bad = r#"{"name": "A", "functions": [{"name": "2fast"}]}"#;
        assert!(matches!(
            Architecture::parse(bad),
            Err(ArchitectureError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_functions_field_is_json_error() {
        assert!(matches!(
            Architecture::parse(r#"{"name": "A"}"#),
            Err(ArchitectureError::Json(_))
        ));
    }

    #[test]
    fn test_prose_without_json() {
        assert!(matches!(
            Architecture::parse("I could not design this."),
            Err(ArchitectureError::Extraction(ExtractionError::NotFound { .. }))
        ));
    }
}
