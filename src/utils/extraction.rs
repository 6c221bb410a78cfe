//! Extraction of structured content from completion text.
//!
//! Models wrap their answers in prose and markdown fences. The pipeline
//! needs two things out of that text: a JSON object (the architecture
//! stage) and a code block in a given language (every other stage).
//!
//! # Example
//!
//! ```
//! use stratforge::utils::extraction::{extract_code_block, extract_json_object};
//!
//! let response = "Here you go: {\"name\": \"Grid\", \"functions\": []}";
//! let json = extract_json_object(response).unwrap();
//! assert!(json.contains("Grid"));
//!
//! let code = extract_code_block("```python\nprint(1)\n```", &["python"]);
//! assert_eq!(code, "print(1)");
//! ```

use regex::Regex;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Find the index of the `}` matching the `{` that starts `s`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Count braces left open at the end of `s`, ignoring string contents.
fn unclosed_braces(s: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

fn parses_as_object(candidate: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(candidate),
        Ok(serde_json::Value::Object(_))
    )
}

/// Largest valid JSON object in `content`; later wins on ties.
fn largest_valid_object(content: &str) -> Option<&str> {
    content
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&content[start..])?;
            let candidate = &content[start..=start + end];
            parses_as_object(candidate).then_some((start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json)
}

/// Extract a JSON object from a completion.
///
/// Tries, in order: a ```json fence, text that is itself an object, and
/// the largest object embedded anywhere in the text. A response that opens
/// an object but never closes it is reported as truncated.
pub fn extract_json_object(content: &str) -> Result<String, ExtractionError> {
    let trimmed = content.trim();

    if let Some(block) = fenced_blocks(trimmed)
        .into_iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case("json"))
        .map(|(_, body)| body)
    {
        if let Some(start) = block.find('{') {
            if let Some(end) = find_matching_brace(&block[start..]) {
                let candidate = &block[start..=start + end];
                if parses_as_object(candidate) {
                    return Ok(candidate.to_string());
                }
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if parses_as_object(candidate) {
                return Ok(candidate.to_string());
            }
        }
    }

    if let Some(json) = largest_valid_object(trimmed) {
        return Ok(json.to_string());
    }

    if let Some(start) = trimmed.find('{') {
        let open = unclosed_braces(&trimmed[start..]);
        if open > 0 {
            return Err(ExtractionError::Truncated {
                partial_preview: preview(&trimmed[start..], 80),
                unclosed_braces: open,
            });
        }
    }

    Err(ExtractionError::NotFound {
        content_preview: preview(trimmed, 80),
    })
}

/// All fenced blocks in `content` as `(language tag, body)` pairs.
fn fenced_blocks(content: &str) -> Vec<(&str, &str)> {
    let Ok(re) = Regex::new(r"```[ \t]*([A-Za-z0-9_+#.-]*)[^\n]*\n([\s\S]*?)```") else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| {
            let lang = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            Some((lang, body.trim_matches('\n').trim_end()))
        })
        .collect()
}

/// Extract the code of a completion.
///
/// Returns the first fenced block tagged with one of `languages`
/// (case-insensitive), else the first fenced block of any language, else
/// the trimmed text itself.
pub fn extract_code_block(content: &str, languages: &[&str]) -> String {
    let blocks = fenced_blocks(content);

    blocks
        .iter()
        .find(|(lang, _)| languages.iter().any(|l| lang.eq_ignore_ascii_case(l)))
        .or_else(|| blocks.first())
        .map(|(_, body)| body.to_string())
        .unwrap_or_else(|| content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_matching_brace_ignores_strings() {
        let s = r#"{"a": "}{", "b": {"c": "\"}"}} trailing"#;
        let end = find_matching_brace(s).unwrap();
        assert_eq!(&s[end + 1..], " trailing");
        assert_eq!(find_matching_brace("{\"open\": 1"), None);
        assert_eq!(find_matching_brace("}"), None);
    }

    #[test]
    fn test_extract_bare_object() {
        let json = extract_json_object(r#"  {"name": "MeanReversion"}  "#).unwrap();
        assert_eq!(json, r#"{"name": "MeanReversion"}"#);
    }

    #[test]
    fn test_extract_from_json_fence() {
        let response = "Sure!\n```json\n{\"name\": \"Grid\", \"functions\": []}\n```\nLet me know.";
        let json = extract_json_object(response).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.contains("Grid"));
    }

    #[test]
    fn test_extract_prefers_largest_embedded_object() {
        let response = r#"For example {"x": 1}. Final answer: {"name": "Arb", "functions": [{"name": "swap"}]}"#;
        let json = extract_json_object(response).unwrap();
        assert!(json.contains("Arb"));
    }

    #[test]
    fn test_extract_truncated() {
        let err = extract_json_object(r#"{"name": "Arb", "functions": [{"name": "sw"#).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Truncated {
                unclosed_braces: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_extract_not_found() {
        let err = extract_json_object("no structure here").unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_extract_code_block_by_language() {
        let response = "Plan:\n```text\nsteps\n```\n\n```Solidity\npragma solidity ^0.8.0;\ncontract A {}\n```";
        let code = extract_code_block(response, &["solidity", "sol"]);
        assert_eq!(code, "pragma solidity ^0.8.0;\ncontract A {}");
    }

    #[test]
    fn test_extract_code_block_falls_back_to_any_fence() {
        let response = "```\ndef run():\n    pass\n```";
        assert_eq!(
            extract_code_block(response, &["python"]),
            "def run():\n    pass"
        );
    }

    #[test]
    fn test_extract_code_block_falls_back_to_raw_text() {
        assert_eq!(extract_code_block("  x = 1\n", &["python"]), "x = 1");
    }
}
