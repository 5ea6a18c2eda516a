use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid test type: {0} (must be unit, integration, e2e, or all)")]
pub struct ParseTestTypeError(pub String);

/// Category of tests to run for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Unit,
    Integration,
    E2e,
    All,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Unit => "unit",
            TestType::Integration => "integration",
            TestType::E2e => "e2e",
            TestType::All => "all",
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, TestType::All)
    }
}

impl Default for TestType {
    fn default() -> Self {
        Self::All
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = ParseTestTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Ok(TestType::Unit),
            "integration" => Ok(TestType::Integration),
            "e2e" => Ok(TestType::E2e),
            "all" => Ok(TestType::All),
            other => Err(ParseTestTypeError(other.to_string())),
        }
    }
}

/// A single failed test as reported by the underlying tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl TestFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack_trace: None,
            file: None,
            line: None,
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

/// Covered/total counter with a derived percentage.
///
/// `percent` is always `covered / total * 100` when `total > 0`. A metric with
/// `total == 0` either carries no data (`percent == 0`) or is a tool-reported
/// summary built by [`CoverageMetric::from_percent`]. Construct counted metrics
/// through [`CoverageMetric::new`] or call [`CoverageMetric::recompute`] after
/// mutating the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetric {
    pub covered: u64,
    pub total: u64,
    pub percent: f64,
}

impl CoverageMetric {
    pub fn new(covered: u64, total: u64) -> Self {
        Self {
            covered,
            total,
            percent: percent_of(covered, total),
        }
    }

    /// A metric that only carries a percentage, as reported by tools that
    /// print a summary figure without line counts.
    pub fn from_percent(percent: f64) -> Self {
        Self {
            covered: 0,
            total: 0,
            percent: percent.clamp(0.0, 100.0),
        }
    }

    /// Whether covered and total counts back the percentage.
    pub fn is_counted(&self) -> bool {
        self.total > 0
    }

    pub fn add(&mut self, other: &CoverageMetric) {
        self.covered += other.covered;
        self.total += other.total;
        self.recompute();
    }

    pub fn recompute(&mut self) {
        self.percent = percent_of(self.covered, self.total);
    }
}

pub fn percent_of(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

/// Coverage for one source file.
///
/// `line_hits` maps a source line to its execution count. A missing key means
/// the line is not instrumented; a `0` value means instrumented but never run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub path: String,
    pub lines: CoverageMetric,
    #[serde(default)]
    pub branches: CoverageMetric,
    #[serde(default)]
    pub functions: CoverageMetric,
    #[serde(default)]
    pub line_hits: BTreeMap<u32, u64>,
}

impl FileCoverage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn record_hits(&mut self, line: u32, hits: u64) {
        *self.line_hits.entry(line).or_insert(0) += hits;
    }

    /// Instrumented lines that were never executed, ascending.
    pub fn uncovered_lines(&self) -> Vec<u32> {
        self.line_hits
            .iter()
            .filter(|(_, hits)| **hits == 0)
            .map(|(line, _)| *line)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageData {
    pub lines: CoverageMetric,
    #[serde(default)]
    pub branches: CoverageMetric,
    #[serde(default)]
    pub functions: CoverageMetric,
    #[serde(default)]
    pub files: Vec<FileCoverage>,
}

impl CoverageData {
    /// Build service coverage whose line totals are the sum of its files.
    pub fn from_files(files: Vec<FileCoverage>) -> Self {
        let mut lines = CoverageMetric::default();
        for file in &files {
            lines.add(&file.lines);
        }
        Self {
            lines,
            files,
            ..Default::default()
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileCoverage> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Outcome of running one service's tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub service: String,
    pub test_type: TestType,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    /// Wall time in seconds.
    pub duration: f64,
    #[serde(default)]
    pub failures: Vec<TestFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageData>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn new(test_type: TestType) -> Self {
        Self {
            test_type,
            ..Default::default()
        }
    }

    /// Stub for a service whose tests could not produce any result.
    pub fn execution_failure(
        service: impl Into<String>,
        test_type: TestType,
        error: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            test_type,
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Mark a run that exited cleanly: success iff nothing failed.
    pub fn complete(&mut self) {
        self.success = self.failed == 0;
    }

    pub fn has_results(&self) -> bool {
        self.total > 0
    }
}

/// Combined results for every service in one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub services: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<AggregateCoverage>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateResult {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            passed: 0,
            failed: 0,
            skipped: 0,
            total: 0,
            duration: 0.0,
            coverage: None,
            success: true,
            error: None,
        }
    }

    /// Fold one service result into the running sums.
    pub fn push(&mut self, result: TestResult) {
        self.passed += result.passed;
        self.failed += result.failed;
        self.skipped += result.skipped;
        self.total += result.total;
        self.duration += result.duration;
        if !result.success {
            self.success = false;
        }
        self.services.push(result);
    }

    pub fn service(&self, name: &str) -> Option<&TestResult> {
        self.services.iter().find(|r| r.service == name)
    }
}

impl Default for AggregateResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Merged coverage of one run.
///
/// `aggregate.lines` sums the counted services only. `percent` is the figure
/// compared against `threshold`: the line-weighted percentage when every
/// service reported line counts, otherwise the mean of per-service percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateCoverage {
    pub services: BTreeMap<String, CoverageData>,
    pub aggregate: CoverageData,
    #[serde(default)]
    pub percent: f64,
    pub threshold: f64,
    pub met: bool,
}
