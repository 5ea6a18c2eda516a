use crate::types::TestType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OUTPUT_DIR: &str = "./test-results";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Global settings for one orchestrator invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    /// Run services concurrently instead of one at a time
    pub parallel: bool,
    /// Abort the whole run on the first service execution error
    pub fail_fast: bool,
    /// Collect coverage even without a threshold
    pub coverage: bool,
    /// Minimum aggregate line coverage (0-100); 0 disables the check
    pub coverage_threshold: f64,
    /// Directory for test and coverage reports
    pub output_dir: PathBuf,
    pub verbose: bool,
    /// Deadline for a single service's test run
    pub timeout: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            fail_fast: false,
            coverage: false,
            coverage_threshold: 0.0,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            verbose: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn coverage_gate_enabled(&self) -> bool {
        self.coverage_threshold > 0.0
    }

    /// Coverage is collected when requested or when a threshold must be checked.
    pub fn collects_coverage(&self) -> bool {
        self.coverage || self.coverage_gate_enabled()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.coverage_threshold) {
            return Err(format!(
                "Coverage threshold must be between 0 and 100, got {}",
                self.coverage_threshold
            ));
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err("Output directory cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Per-service test configuration, either declared in the manifest or detected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceTestConfig {
    #[serde(default)]
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TestTypeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<TestTypeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2e: Option<TestTypeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageConfig>,
}

impl ServiceTestConfig {
    pub fn with_framework(framework: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            ..Default::default()
        }
    }

    /// Settings for one test type. `All` has no dedicated block.
    pub fn type_config(&self, test_type: TestType) -> Option<&TestTypeConfig> {
        match test_type {
            TestType::Unit => self.unit.as_ref(),
            TestType::Integration => self.integration.as_ref(),
            TestType::E2e => self.e2e.as_ref(),
            TestType::All => None,
        }
    }

    /// Fill fields that are still unset from a detected configuration.
    ///
    /// Existing values are never overwritten, so an explicit setting always
    /// wins over detection.
    pub fn fill_missing_from(&mut self, detected: ServiceTestConfig) {
        if self.framework.is_empty() {
            self.framework = detected.framework;
        }
        if self.unit.is_none() {
            self.unit = detected.unit;
        }
        if self.integration.is_none() {
            self.integration = detected.integration;
        }
        if self.e2e.is_none() {
            self.e2e = detected.e2e;
        }
        if self.coverage.is_none() {
            self.coverage = detected.coverage;
        }
    }

    pub fn setup_commands(&self, test_type: TestType) -> &[String] {
        self.type_config(test_type)
            .map(|c| c.setup.as_slice())
            .unwrap_or(&[])
    }

    pub fn teardown_commands(&self, test_type: TestType) -> &[String] {
        self.type_config(test_type)
            .map(|c| c.teardown.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestTypeConfig {
    /// Explicit command line; overrides the framework default when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Test name / path pattern (Node.js, Go)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// pytest markers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
    /// `dotnet test --filter` expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// .NET test project paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<String>,
}

impl TestTypeConfig {
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn with_markers(markers: Vec<String>) -> Self {
        Self {
            markers,
            ..Default::default()
        }
    }

    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Default::default()
        }
    }

    /// Explicit command, ignoring blank strings.
    pub fn explicit_command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub threshold: f64,
    /// Source directory to measure (pytest `--cov=<source>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}
