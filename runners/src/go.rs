use crate::command::CommandLine;
use crate::detect::project_files;
use crate::parse::capture_f64;
use crate::{RunnerContext, RunnerResult, TestRunner};
use model::{CoverageData, CoverageMetric, FileCoverage, TestFailure, TestResult, TestType};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

pub const COVERAGE_PROFILE: &str = "coverage.out";

static TEST_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([\d.]+)s\)").expect("go test duration pattern is valid"));
static PACKAGE_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)s$").expect("go package duration pattern is valid"));
static COVERAGE_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"coverage:\s*([\d.]+)%").expect("go coverage pattern is valid"));
static FAILURE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+\.go):(\d+): (.*)$").expect("go failure location pattern is valid")
});

pub struct GoRunner {
    ctx: RunnerContext,
}

impl GoRunner {
    pub fn new(ctx: RunnerContext) -> Self {
        Self { ctx }
    }

    /// `-run` regex for a test type; configured patterns win over the defaults.
    pub fn test_pattern(&self, test_type: TestType) -> Option<String> {
        let configured = self
            .ctx
            .config
            .type_config(test_type)
            .and_then(|c| c.pattern.clone())
            .filter(|p| !p.is_empty());
        if configured.is_some() {
            return configured;
        }
        match test_type {
            TestType::Unit => Some("^Test[^IE]|^Test$|^TestUnit".to_string()),
            TestType::Integration => Some("Integration".to_string()),
            TestType::E2e => Some("E2E|EndToEnd".to_string()),
            TestType::All => None,
        }
    }
}

impl TestRunner for GoRunner {
    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn build_command(&self, test_type: TestType, coverage: bool) -> RunnerResult<CommandLine> {
        if let Some(explicit) = self.ctx.explicit_command(test_type) {
            return explicit;
        }

        let mut command = CommandLine::new("go").args(["test", "-v"]);
        if let Some(pattern) = self.test_pattern(test_type) {
            command = command.arg("-run").arg(pattern);
        }
        if coverage {
            command = command
                .arg("-cover")
                .arg(format!("-coverprofile={}", COVERAGE_PROFILE));
        }
        Ok(command.arg("./..."))
    }

    fn parse_output(&self, output: &str, result: &mut TestResult) {
        let mut per_test_duration = 0.0;
        let mut package_duration = 0.0;
        let mut last_location: Option<(String, u32, String)> = None;

        for line in output.lines().map(str::trim) {
            if let Some(caps) = FAILURE_LOCATION.captures(line) {
                let line_no = caps[2].parse().unwrap_or(0);
                last_location = Some((caps[1].to_string(), line_no, caps[3].to_string()));
            }

            if let Some(rest) = line.strip_prefix("--- PASS:") {
                result.passed += 1;
                result.total += 1;
                per_test_duration += capture_f64(&TEST_DURATION, rest).unwrap_or(0.0);
            } else if let Some(rest) = line.strip_prefix("--- FAIL:") {
                result.failed += 1;
                result.total += 1;
                per_test_duration += capture_f64(&TEST_DURATION, rest).unwrap_or(0.0);

                let name = rest.split_whitespace().next().unwrap_or_default();
                let mut failure = TestFailure::new(name, "test failed");
                if let Some((file, line_no, message)) = last_location.take() {
                    failure.message = message;
                    failure.file = Some(file);
                    failure.line = (line_no > 0).then_some(line_no);
                }
                result.failures.push(failure);
            } else if line.starts_with("--- SKIP:") {
                result.skipped += 1;
                result.total += 1;
            }

            if line.starts_with("ok ") || line.starts_with("ok\t") || line.starts_with("FAIL\t") {
                package_duration += capture_f64(&PACKAGE_DURATION, line).unwrap_or(0.0);
            }

            if line.contains("% of statements") {
                if let Some(percent) = capture_f64(&COVERAGE_PERCENT, line) {
                    result
                        .coverage
                        .get_or_insert_with(CoverageData::default)
                        .lines = CoverageMetric::from_percent(percent);
                }
            }
        }

        result.duration = if per_test_duration > 0.0 {
            per_test_duration
        } else {
            package_duration
        };

        if result.total == 0 {
            if output.contains("PASS") && !output.contains("FAIL") {
                result.passed = 1;
                result.total = 1;
            } else if output.contains("FAIL") {
                result.failed = 1;
                result.total = 1;
            }
        }
    }

    fn prepare_coverage(&self) {
        let profile = self.ctx.project_dir.join(COVERAGE_PROFILE);
        match std::fs::remove_file(&profile) {
            Ok(()) => debug!(path = %profile.display(), "removed stale coverage profile"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %profile.display(), error = %e, "failed to remove stale coverage profile"),
        }
    }

    fn collect_coverage(&self, result: &mut TestResult) {
        let profile = self.ctx.project_dir.join(COVERAGE_PROFILE);
        if !profile.exists() {
            return;
        }
        match std::fs::read_to_string(&profile) {
            Ok(content) => result.coverage = Some(parse_coverage_profile(&content)),
            Err(e) => warn!(path = %profile.display(), error = %e, "failed to read coverage profile"),
        }
    }

    fn has_tests(&self) -> bool {
        let dir = &self.ctx.project_dir;
        dir.join("go.mod").exists() && project_files(dir).any(|p| is_go_test_file(&p))
    }
}

fn is_go_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("_test.go"))
}

/// Parse a `go test -coverprofile` file.
///
/// Each block row is `file:startLine.startCol,endLine.endCol numStmts count`.
/// Statement counts roll up into line totals and the block's hit count is
/// recorded against its start line.
pub fn parse_coverage_profile(content: &str) -> CoverageData {
    let mut files: BTreeMap<String, FileCoverage> = BTreeMap::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("mode:") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(location), Some(stmts), Some(count)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Some((path, range)) = location.rsplit_once(':') else {
            continue;
        };
        let stmts: u64 = stmts.parse().unwrap_or(0);
        let count: u64 = count.parse().unwrap_or(0);
        let start_line: u32 = range
            .split_once('.')
            .and_then(|(l, _)| l.parse().ok())
            .unwrap_or(0);

        let file = files
            .entry(path.to_string())
            .or_insert_with(|| FileCoverage::new(path));
        file.lines.total += stmts;
        if count > 0 {
            file.lines.covered += stmts;
        }
        if start_line > 0 {
            file.record_hits(start_line, count);
        }
    }

    let files = files
        .into_values()
        .map(|mut f| {
            f.lines.recompute();
            f
        })
        .collect();
    CoverageData::from_files(files)
}
