use crate::config::ServiceTestConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Language families with a test runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Node,
    Python,
    Go,
    Dotnet,
}

impl Language {
    /// Resolve a manifest language name, accepting the common aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "js" | "javascript" | "typescript" | "ts" | "node" | "nodejs" => Some(Language::Node),
            "python" | "py" => Some(Language::Python),
            "go" | "golang" => Some(Language::Go),
            "csharp" | "dotnet" | "fsharp" | "cs" | "fs" => Some(Language::Dotnet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Node => "node",
            Language::Python => "python",
            Language::Go => "go",
            Language::Dotnet => "dotnet",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service under test as declared in the project manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    /// Language name as written in the manifest
    pub language: String,
    /// Absolute (or manifest-relative, already resolved) project directory
    pub dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServiceTestConfig>,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, language: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            dir: dir.into(),
            config: None,
        }
    }

    pub fn with_config(mut self, config: ServiceTestConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn language_kind(&self) -> Option<Language> {
        Language::parse(&self.language)
    }
}
