//! Test-result reports: JSON dump, JUnit XML and GitHub Actions integration.
//!
//! Console output is not produced here; the `default` format is a no-op so
//! callers can hand any configured format to [`ReportGenerator::generate`].

use chrono::{SecondsFormat, Utc};
use model::{AggregateResult, TestResult};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const JSON_FILE_NAME: &str = "test-results.json";
pub const JUNIT_FILE_NAME: &str = "test-results.xml";
const SUITES_NAME: &str = "polytest";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML error: {reason}")]
    Xml { reason: String },
}

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Console summary only
    #[default]
    Default,
    Json,
    Junit,
    Github,
}

impl ReportFormat {
    /// Parse a format name; unknown names fall back to console output.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "junit" => Self::Junit,
            "github" => Self::Github,
            _ => Self::Default,
        }
    }
}

/// Locations of the GitHub Actions step summary and output files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GithubEnv {
    pub step_summary: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl GithubEnv {
    pub fn from_env() -> Self {
        let path = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            step_summary: path("GITHUB_STEP_SUMMARY"),
            output: path("GITHUB_OUTPUT"),
        }
    }
}

pub struct ReportGenerator {
    format: ReportFormat,
    output_dir: PathBuf,
    github: GithubEnv,
}

impl ReportGenerator {
    pub fn new(format: ReportFormat, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            format,
            output_dir: output_dir.into(),
            github: GithubEnv::from_env(),
        }
    }

    pub fn with_github_env(mut self, github: GithubEnv) -> Self {
        self.github = github;
        self
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Render `results` in the configured format. Annotations go to stdout.
    pub fn generate(&self, results: &AggregateResult) -> ReportResult<()> {
        self.generate_to(results, &mut io::stdout().lock())
    }

    pub fn generate_to(&self, results: &AggregateResult, out: &mut dyn Write) -> ReportResult<()> {
        match self.format {
            ReportFormat::Json => {
                let path = self.prepare(JSON_FILE_NAME)?;
                fs::write(&path, serde_json::to_string_pretty(results)?)?;
                debug!(path = %path.display(), "wrote JSON test report");
            }
            ReportFormat::Junit => {
                let path = self.prepare(JUNIT_FILE_NAME)?;
                fs::write(&path, render_junit(results)?)?;
                debug!(path = %path.display(), "wrote JUnit test report");
            }
            ReportFormat::Github => self.write_github(results, out)?,
            ReportFormat::Default => {}
        }
        Ok(())
    }

    fn prepare(&self, file_name: &str) -> ReportResult<PathBuf> {
        if !self.output_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.output_dir)?;
        }
        Ok(self.output_dir.join(file_name))
    }

    fn write_github(&self, results: &AggregateResult, out: &mut dyn Write) -> ReportResult<()> {
        for line in github_annotations(results) {
            writeln!(out, "{line}")?;
        }

        if let Some(path) = &self.github.step_summary {
            if let Err(e) = append(path, &github_summary(results)) {
                warn!(path = %path.display(), error = %e, "failed to write GitHub step summary");
            }
        }

        if let Some(path) = &self.github.output {
            let outputs: String = github_outputs(results)
                .iter()
                .map(|line| format!("{line}\n"))
                .collect();
            if let Err(e) = append(path, &outputs) {
                warn!(path = %path.display(), error = %e, "failed to write GitHub outputs");
            }
        }
        Ok(())
    }
}

fn append(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(contents.as_bytes())
}

#[derive(Debug, Serialize)]
#[serde(rename = "testsuites")]
struct JunitSuites {
    #[serde(rename = "@name")]
    name: &'static str,
    #[serde(rename = "@tests")]
    tests: usize,
    #[serde(rename = "@failures")]
    failures: usize,
    #[serde(rename = "@errors")]
    errors: usize,
    #[serde(rename = "@skipped")]
    skipped: usize,
    #[serde(rename = "@time")]
    time: f64,
    #[serde(rename = "@timestamp")]
    timestamp: String,
    testsuite: Vec<JunitSuite>,
}

#[derive(Debug, Serialize)]
struct JunitSuite {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@tests")]
    tests: usize,
    #[serde(rename = "@failures")]
    failures: usize,
    #[serde(rename = "@errors")]
    errors: usize,
    #[serde(rename = "@skipped")]
    skipped: usize,
    #[serde(rename = "@time")]
    time: f64,
    #[serde(rename = "@timestamp")]
    timestamp: String,
    testcase: Vec<JunitCase>,
}

#[derive(Debug, Serialize)]
struct JunitCase {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@classname")]
    classname: String,
    #[serde(rename = "@time")]
    time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<JunitFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<JunitSkipped>,
}

#[derive(Debug, Serialize)]
struct JunitFailure {
    #[serde(rename = "@message")]
    message: String,
    #[serde(rename = "@type")]
    kind: &'static str,
    #[serde(rename = "$text")]
    content: String,
}

#[derive(Debug, Serialize)]
struct JunitSkipped {
    #[serde(rename = "@message")]
    message: &'static str,
}

/// Build the JUnit document.
///
/// Only failures carry real test identities. Passed and skipped tests are
/// placeholders (`test_N`, `skipped_test_N`) synthesized from the counts, with
/// passed placeholders sharing the service duration evenly.
pub fn render_junit(results: &AggregateResult) -> ReportResult<String> {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let suites = JunitSuites {
        name: SUITES_NAME,
        tests: results.total,
        failures: results.failed,
        errors: 0,
        skipped: results.skipped,
        time: results.duration,
        timestamp: timestamp.clone(),
        testsuite: results
            .services
            .iter()
            .map(|r| junit_suite(r, &timestamp))
            .collect(),
    };

    crate::xml::to_document(&suites).map_err(|reason| ReportError::Xml { reason })
}

fn junit_suite(result: &TestResult, timestamp: &str) -> JunitSuite {
    let case = |name: String, time: f64| JunitCase {
        name,
        classname: result.service.clone(),
        time,
        failure: None,
        skipped: None,
    };

    let mut cases: Vec<JunitCase> = result
        .failures
        .iter()
        .map(|f| JunitCase {
            failure: Some(JunitFailure {
                message: f.message.clone(),
                kind: "AssertionError",
                content: f.stack_trace.clone().unwrap_or_default(),
            }),
            ..case(f.name.clone(), 0.0)
        })
        .collect();

    let per_test = if result.total > 0 {
        result.duration / result.total as f64
    } else {
        0.0
    };
    cases.extend((1..=result.passed).map(|i| case(format!("test_{i}"), per_test)));
    cases.extend((1..=result.skipped).map(|i| JunitCase {
        skipped: Some(JunitSkipped {
            message: "Test skipped",
        }),
        ..case(format!("skipped_test_{i}"), 0.0)
    }));

    JunitSuite {
        name: result.service.clone(),
        tests: result.total,
        failures: result.failed,
        errors: 0,
        skipped: result.skipped,
        time: result.duration,
        timestamp: timestamp.to_string(),
        testcase: cases,
    }
}

/// One `::error` workflow command per recorded failure.
pub fn github_annotations(results: &AggregateResult) -> Vec<String> {
    results
        .services
        .iter()
        .flat_map(|r| {
            r.failures.iter().map(move |f| match &f.file {
                Some(file) => format!(
                    "::error file={},line={},title=Test Failed: {}::{}",
                    file,
                    f.line.unwrap_or(0),
                    f.name,
                    f.message
                ),
                None => format!(
                    "::error title=Test Failed: {} [{}]::{}",
                    f.name, r.service, f.message
                ),
            })
        })
        .collect()
}

/// `key=value` lines for `$GITHUB_OUTPUT`.
pub fn github_outputs(results: &AggregateResult) -> Vec<String> {
    let mut outputs = vec![
        format!("tests_total={}", results.total),
        format!("tests_passed={}", results.passed),
        format!("tests_failed={}", results.failed),
        format!("tests_skipped={}", results.skipped),
        format!("tests_success={}", results.success),
    ];
    if let Some(coverage) = &results.coverage {
        outputs.push(format!(
            "coverage_percent={:.1}",
            coverage.percent
        ));
    }
    outputs
}

/// Markdown job summary.
pub fn github_summary(results: &AggregateResult) -> String {
    let mut md = String::from("## 🧪 Test Results\n\n");
    md.push_str(if results.success {
        "### ✅ All tests passed!\n\n"
    } else {
        "### ❌ Some tests failed\n\n"
    });

    md.push_str("| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(md, "| Total Tests | {} |", results.total);
    let _ = writeln!(md, "| Passed | {} |", results.passed);
    let _ = writeln!(md, "| Failed | {} |", results.failed);
    let _ = writeln!(md, "| Skipped | {} |", results.skipped);
    let _ = writeln!(md, "| Duration | {:.2}s |", results.duration);

    md.push_str("\n### Services\n\n");
    md.push_str("| Service | Status | Passed | Failed | Coverage |\n");
    md.push_str("|---------|--------|--------|--------|----------|\n");
    for r in &results.services {
        let coverage = results
            .coverage
            .as_ref()
            .and_then(|c| c.services.get(&r.service))
            .map(|c| format!("{:.1}%", c.lines.percent))
            .unwrap_or_else(|| "N/A".to_string());
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            r.service,
            if r.success { "✅" } else { "❌" },
            r.passed,
            r.failed,
            coverage
        );
    }

    if let Some(coverage) = &results.coverage {
        md.push_str("\n### 📊 Coverage Summary\n\n");
        let _ = writeln!(
            md,
            "**Overall Coverage:** {:.1}%\n",
            coverage.percent
        );
        if coverage.threshold > 0.0 {
            let verdict = if coverage.met {
                "✅ Coverage meets"
            } else {
                "❌ Coverage below"
            };
            let _ = writeln!(md, "{verdict} threshold of {:.0}%", coverage.threshold);
        }
    }

    if results.services.iter().any(|r| !r.failures.is_empty()) {
        md.push_str("\n### ❌ Failed Tests\n\n");
        for r in &results.services {
            for f in &r.failures {
                let _ = writeln!(md, "#### {}: {}\n", r.service, f.name);
                let _ = writeln!(md, "**Message:** {}\n", f.message);
                if let Some(trace) = &f.stack_trace {
                    let _ = writeln!(md, "```\n{trace}\n```\n");
                }
            }
        }
    }
    md
}
