//! Shallow checks of a generated artifact.
//!
//! These catch truncated or malformed completions before the artifact is
//! sent out for verification. They are not a parser: delimiters are matched
//! with string literals and comments skipped, and the rest is pattern
//! matching on the source text.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    /// 1-based line number, when the finding has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    fn error(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line,
        }
    }

    fn warning(message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            line,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.line {
            Some(line) => write!(f, "{} (line {}): {}", level, line, self.message),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

/// All findings for one artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} errors, {} warnings",
            self.errors().count(),
            self.warnings().count()
        )
    }
}

/// Runs every check for `kind` against `source`.
pub fn check_artifact(kind: ArtifactKind, source: &str) -> ValidationReport {
    let mut issues = Vec::new();

    if source.trim().is_empty() {
        issues.push(Issue::error("artifact is empty", None));
        return ValidationReport { issues };
    }

    issues.extend(check_delimiters(kind, source));
    match kind {
        ArtifactKind::Python => issues.extend(check_python(source)),
        ArtifactKind::Solidity => issues.extend(check_solidity(source)),
    }

    ValidationReport { issues }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Matches `()[]{}` outside string literals and comments.
pub fn check_delimiters(kind: ArtifactKind, source: &str) -> Vec<Issue> {
    let chars: Vec<char> = source.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut issues = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '\n' => line += 1,
            '#' if kind == ArtifactKind::Python => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if kind == ArtifactKind::Solidity && next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if kind == ArtifactKind::Solidity && next == Some('*') => {
                let start_line = line;
                i += 2;
                loop {
                    match (chars.get(i), chars.get(i + 1)) {
                        (Some('*'), Some('/')) => {
                            i += 2;
                            break;
                        }
                        (Some(ch), _) => {
                            if *ch == '\n' {
                                line += 1;
                            }
                            i += 1;
                        }
                        (None, _) => {
                            issues.push(Issue::error("unterminated block comment", Some(start_line)));
                            return issues;
                        }
                    }
                }
                continue;
            }
            '"' | '\'' => {
                let start_line = line;
                let triple = kind == ArtifactKind::Python
                    && next == Some(c)
                    && chars.get(i + 2) == Some(&c);
                i += if triple { 3 } else { 1 };
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' {
                        if chars.get(i + 1) == Some(&'\n') {
                            line += 1;
                        }
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        if !triple {
                            break;
                        }
                        line += 1;
                    }
                    if ch == c
                        && (!triple
                            || (chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c)))
                    {
                        i += if triple { 3 } else { 1 };
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    issues.push(Issue::error("unterminated string literal", Some(start_line)));
                    if triple {
                        return issues;
                    }
                }
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closing_for(open) == c => {}
                Some((open, open_line)) => {
                    issues.push(Issue::error(
                        format!(
                            "'{}' does not match '{}' opened on line {}",
                            c, open, open_line
                        ),
                        Some(line),
                    ));
                }
                None => issues.push(Issue::error(format!("unmatched '{}'", c), Some(line))),
            },
            _ => {}
        }
        i += 1;
    }

    for (open, open_line) in stack {
        issues.push(Issue::error(format!("unclosed '{}'", open), Some(open_line)));
    }
    issues
}

fn check_python(source: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    let has_definition = source.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("def ") || t.starts_with("async def ") || t.starts_with("class ")
    });
    if !has_definition {
        issues.push(Issue::error("no function or class definition found", None));
    }

    let mut first_tab = None;
    let mut first_space = None;
    for (n, l) in source.lines().enumerate() {
        let indent: String = l.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if indent.is_empty() || l.trim().is_empty() {
            continue;
        }
        if indent.contains('\t') && indent.contains(' ') {
            issues.push(Issue::error("line mixes tabs and spaces in indentation", Some(n + 1)));
        } else if indent.contains('\t') {
            first_tab.get_or_insert(n + 1);
        } else {
            first_space.get_or_insert(n + 1);
        }
    }
    if let (Some(tab), Some(space)) = (first_tab, first_space) {
        issues.push(Issue::error(
            format!(
                "indentation mixes tabs (line {}) and spaces (line {})",
                tab, space
            ),
            Some(tab.max(space)),
        ));
    }

    for (n, l) in source.lines().enumerate() {
        let t = l.trim();
        if t == "..." || t.starts_with("raise NotImplementedError") {
            issues.push(Issue::warning("placeholder body", Some(n + 1)));
        }
    }

    issues
}

fn check_solidity(source: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    if !source.contains("pragma solidity") {
        issues.push(Issue::error("missing 'pragma solidity' directive", None));
    }

    let declares_contract = Regex::new(r"(?m)^\s*(abstract\s+)?contract\s+[A-Za-z_]\w*")
        .map(|re| re.is_match(source))
        .unwrap_or(false);
    if !declares_contract {
        issues.push(Issue::error("no contract declaration found", None));
    }

    if !source.contains("SPDX-License-Identifier") {
        issues.push(Issue::warning("missing SPDX license identifier", Some(1)));
    }

    issues
}
