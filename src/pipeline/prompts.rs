//! Prompt construction for the completion stages.
//!
//! Every stage gets a system prompt fixed per artifact kind and a user
//! prompt carrying the previous stage's output.

use crate::artifact::ArtifactKind;
use crate::llm::Message;

use super::architecture::{Architecture, FunctionSpec};

const STRATEGY_SYSTEM: &str = r#"You are a quantitative strategist. Expand the user's trading idea into a precise, implementable strategy description.

Cover:
- Market and instruments traded
- Entry and exit signals, with exact conditions
- Position sizing and risk limits
- Data the strategy reads and state it keeps between runs

Write plain prose and bullet points. Do not write code."#;

const ARCHITECTURE_SYSTEM_PYTHON: &str = r#"You are a senior Python engineer designing a standalone trading strategy script.

Respond with a single JSON object and nothing else:
{
  "name": "snake_case_module_name",
  "description": "one sentence",
  "state": [{"name": "...", "type": "...", "description": "..."}],
  "functions": [{"name": "...", "description": "...", "signature": "def name(arg: type) -> type"}]
}

Functions must be small, independently implementable, and include a `main` entry point."#;

const ARCHITECTURE_SYSTEM_SOLIDITY: &str = r#"You are a senior Solidity engineer designing an on-chain trading strategy contract.

Respond with a single JSON object and nothing else:
{
  "name": "PascalCaseContractName",
  "description": "one sentence",
  "state": [{"name": "...", "type": "uint256", "description": "..."}],
  "functions": [{"name": "...", "description": "...", "signature": "function name(uint256 x) external returns (bool)"}]
}

Use Solidity ^0.8.x semantics. Keep functions small and independently implementable."#;

const IMPLEMENTATION_SYSTEM_PYTHON: &str = r#"You are a senior Python engineer. Implement exactly one function of a trading strategy module.

Rules:
- Output one ```python fenced block containing only that function (plus imports it needs)
- Follow the given signature exactly
- Use 4-space indentation, never tabs
- No placeholder bodies"#;

const IMPLEMENTATION_SYSTEM_SOLIDITY: &str = r#"You are a senior Solidity engineer. Implement exactly one function of a trading strategy contract.

Rules:
- Output one ```solidity fenced block containing only that function
- Follow the given signature exactly
- Refer to state variables by the names in the architecture
- No placeholder bodies"#;

const AGGREGATION_SYSTEM_PYTHON: &str = r#"You are a senior Python engineer. Merge the given function implementations into one complete, runnable Python module.

Rules:
- Output one ```python fenced block with the whole file
- Deduplicate imports at the top; declare module-level state once
- Keep every function; fix obvious inconsistencies between them
- End with an `if __name__ == "__main__":` guard calling main()"#;

const AGGREGATION_SYSTEM_SOLIDITY: &str = r#"You are a senior Solidity engineer. Merge the given function implementations into one complete Solidity source file.

Rules:
- Output one ```solidity fenced block with the whole file
- Start with an SPDX license identifier and `pragma solidity ^0.8.20;`
- Declare the contract once, with every state variable and every function
- Fix obvious inconsistencies between functions"#;

/// Messages for the strategy generation stage.
pub fn strategy_messages(kind: ArtifactKind, idea: &str) -> Vec<Message> {
    vec![
        Message::system(STRATEGY_SYSTEM),
        Message::user(format!(
            "Trading idea:\n{}\n\nThe strategy will be implemented as {}.",
            idea.trim(),
            target_description(kind)
        )),
    ]
}

/// Messages for the architecture synthesis stage.
pub fn architecture_messages(kind: ArtifactKind, strategy: &str) -> Vec<Message> {
    let system = match kind {
        ArtifactKind::Python => ARCHITECTURE_SYSTEM_PYTHON,
        ArtifactKind::Solidity => ARCHITECTURE_SYSTEM_SOLIDITY,
    };
    vec![
        Message::system(system),
        Message::user(format!("Strategy:\n{}", strategy.trim())),
    ]
}

/// Messages for implementing one architecture function.
pub fn implementation_messages(
    kind: ArtifactKind,
    strategy: &str,
    architecture: &Architecture,
    function: &FunctionSpec,
) -> Vec<Message> {
    let system = match kind {
        ArtifactKind::Python => IMPLEMENTATION_SYSTEM_PYTHON,
        ArtifactKind::Solidity => IMPLEMENTATION_SYSTEM_SOLIDITY,
    };
    let mut user = format!(
        "Strategy:\n{}\n\nArchitecture:\n{}\n\nImplement `{}`.",
        strategy.trim(),
        architecture.to_prompt_json(),
        function.name
    );
    if !function.description.is_empty() {
        user.push_str(&format!("\nPurpose: {}", function.description));
    }
    if !function.signature.is_empty() {
        user.push_str(&format!("\nSignature: {}", function.signature));
    }
    vec![Message::system(system), Message::user(user)]
}

/// Messages for merging all implementations into one artifact.
pub fn aggregation_messages(
    kind: ArtifactKind,
    architecture: &Architecture,
    implementations: &[(FunctionSpec, String)],
) -> Vec<Message> {
    let system = match kind {
        ArtifactKind::Python => AGGREGATION_SYSTEM_PYTHON,
        ArtifactKind::Solidity => AGGREGATION_SYSTEM_SOLIDITY,
    };
    let mut user = format!("Architecture:\n{}\n\nImplementations:\n", architecture.to_prompt_json());
    for (function, code) in implementations {
        user.push_str(&format!(
            "\n### {}\n```{}\n{}\n```\n",
            function.name,
            kind.fence_language(),
            code.trim()
        ));
    }
    vec![Message::system(system), Message::user(user)]
}

fn target_description(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Python => "a standalone Python script",
        ArtifactKind::Solidity => "a Solidity smart contract",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn architecture() -> Architecture {
        Architecture {
            name: "Momentum".to_string(),
            description: String::new(),
            state: vec![],
            functions: vec![FunctionSpec {
                name: "signal".to_string(),
                description: "Compute the momentum signal".to_string(),
                signature: "def signal(prices: list[float]) -> float".to_string(),
            }],
        }
    }

    #[test]
    fn test_prompts_follow_artifact_kind() {
        let py = architecture_messages(ArtifactKind::Python, "buy high");
        let sol = architecture_messages(ArtifactKind::Solidity, "buy high");
        assert!(py[0].content.contains("Python"));
        assert!(sol[0].content.contains("Solidity"));
        assert_eq!(py[1].content, "Strategy:\nbuy high");
    }

    #[test]
    fn test_implementation_prompt_names_function() {
        let arch = architecture();
        let messages =
            implementation_messages(ArtifactKind::Python, "strategy", &arch, &arch.functions[0]);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("Implement `signal`"));
        assert!(messages[1].content.contains("Signature: def signal"));
    }

    #[test]
    fn test_aggregation_prompt_fences_each_function() {
        let arch = architecture();
        let implementations = vec![(arch.functions[0].clone(), "def signal(p):\n    return 0.0".to_string())];
        let messages = aggregation_messages(ArtifactKind::Python, &arch, &implementations);
        assert!(messages[1].content.contains("### signal\n```python\ndef signal"));
    }
}
