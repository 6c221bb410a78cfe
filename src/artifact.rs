//! Kinds of code artifact the pipeline can produce.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target language of a generated strategy artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A standalone Python strategy script.
    Python,
    /// A Solidity smart contract.
    Solidity,
}

impl ArtifactKind {
    /// File extension for the artifact, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Python => "py",
            ArtifactKind::Solidity => "sol",
        }
    }

    /// Language tag used on fenced code blocks.
    pub fn fence_language(self) -> &'static str {
        match self {
            ArtifactKind::Python => "python",
            ArtifactKind::Solidity => "solidity",
        }
    }

    /// Fence tags that mark a code block in this language.
    pub fn fence_aliases(self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Python => &["python", "py", "python3"],
            ArtifactKind::Solidity => &["solidity", "sol"],
        }
    }

    /// Guess the kind from a file path's extension.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" => Some(ArtifactKind::Python),
            "sol" => Some(ArtifactKind::Solidity),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fence_language())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(ArtifactKind::Python),
            "solidity" | "sol" => Ok(ArtifactKind::Solidity),
            other => Err(format!(
                "unknown artifact kind '{}': expected 'python' or 'solidity'",
                other
            )),
        }
    }
}
