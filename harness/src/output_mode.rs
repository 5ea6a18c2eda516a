//! How test progress is displayed, decided from the terminal and CI environment.

use runners::Echo;
use std::fmt;
use std::io::IsTerminal;

/// Environment variables set by common CI providers.
pub const CI_ENV_VARS: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "TEAMCITY_VERSION",
    "TF_BUILD",
    "BUILDKITE",
    "CODEBUILD_BUILD_ID",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Raw tool output
    Stream,
    /// Tool output with a `[service]` prefix on every line
    StreamPrefixed,
    /// Per-service progress lines, tool output hidden
    Progress,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::StreamPrefixed => "stream-prefixed",
            Self::Progress => "progress",
        }
    }

    /// How the process executor should echo child output in this mode.
    pub fn echo(&self) -> Echo {
        match self {
            Self::Stream => Echo::Plain,
            Self::StreamPrefixed => Echo::Prefixed,
            Self::Progress => Echo::Silent,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// `--stream`
    pub force_stream: bool,
    /// `--no-stream`
    pub force_progress: bool,
    pub parallel: bool,
}

/// Pick the display mode.
///
/// A non-terminal stdout always streams. In CI the same streaming choice
/// applies unless progress was explicitly forced. Otherwise explicit flags
/// win, then a single service streams, a sequential run streams with
/// prefixes, and a parallel run shows progress.
pub fn select_output_mode(
    options: &OutputOptions,
    service_count: usize,
    is_tty: bool,
    in_ci: bool,
) -> OutputMode {
    let streaming = if service_count > 1 {
        OutputMode::StreamPrefixed
    } else {
        OutputMode::Stream
    };

    if !is_tty || (in_ci && !options.force_progress) {
        return streaming;
    }
    if options.force_stream {
        return OutputMode::Stream;
    }
    if options.force_progress {
        return OutputMode::Progress;
    }
    if service_count <= 1 {
        return OutputMode::Stream;
    }
    if !options.parallel {
        return OutputMode::StreamPrefixed;
    }
    OutputMode::Progress
}

/// Whether any known CI variable is set to a non-empty value.
pub fn detect_ci<F>(lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    CI_ENV_VARS
        .iter()
        .any(|key| lookup(key).is_some_and(|v| !v.is_empty()))
}

pub fn is_ci_environment() -> bool {
    detect_ci(|key| std::env::var(key).ok())
}

pub fn stdout_is_tty() -> bool {
    std::io::stdout().is_terminal()
}
