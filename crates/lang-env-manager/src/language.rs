//! Supported repository languages and their directory layouts.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Language of a monitored repository.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// GOPATH workspace: sources under `src/<slug>`, `GOPATH` exported.
    Go,

    /// Cargo project with an isolated `CARGO_TARGET_DIR`.
    Rust,

    /// Plain checkout, no toolchain variables.
    #[default]
    Generic,
}

impl Language {
    /// Get the language name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Generic => "generic",
        }
    }

    /// Directory the revision is checked out into, relative to `root`.
    pub(crate) fn working_dir(&self, root: &Path, slug: &str) -> PathBuf {
        root.join("src").join(slug)
    }

    /// Toolchain variables for an environment rooted at `root`.
    pub(crate) fn env(&self, root: &Path) -> Vec<(String, String)> {
        match self {
            Language::Go => vec![
                ("GOPATH".to_string(), root.display().to_string()),
                (
                    "GOBIN".to_string(),
                    root.join("bin").display().to_string(),
                ),
            ],
            Language::Rust => vec![(
                "CARGO_TARGET_DIR".to_string(),
                root.join("target").display().to_string(),
            )],
            Language::Generic => Vec::new(),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            "" | "generic" => Ok(Language::Generic),
            other => Err(EnvError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Reject slugs that would escape the environment root.
pub(crate) fn validate_slug(slug: &str) -> crate::Result<()> {
    let path = Path::new(slug);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if slug.is_empty() || escapes {
        return Err(EnvError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}
