use crate::command::CommandLine;
use crate::detect::detect_python_package_manager;
use crate::parse::{capture_f64, capture_usize, count_before};
use crate::{RunnerContext, RunnerResult, TestRunner};
use model::{CoverageData, CoverageMetric, FileCoverage, TestFailure, TestResult, TestType};
use regex::Regex;
use std::fs;
use std::sync::LazyLock;

static PYTEST_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bin ([\d.]+)s").expect("pytest duration pattern is valid"));
static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+ (passed|failed|skipped|errors?)\b").expect("pytest summary pattern is valid")
});
static PYTEST_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAILED|ERROR) ([^\s:]+)::(\S+)(?: - (.*))?$")
        .expect("pytest failure pattern is valid")
});
static UNITTEST_RAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Ran (\d+) tests?").expect("unittest ran pattern is valid"));
static UNITTEST_FAILURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"failures=(\d+)").expect("unittest failures pattern is valid"));
static UNITTEST_ERRORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"errors=(\d+)").expect("unittest errors pattern is valid"));
static UNITTEST_SKIPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"skipped=(\d+)").expect("unittest skipped pattern is valid"));
static UNITTEST_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAIL|ERROR): (\S+) \(([^)]+)\)").expect("unittest failure pattern is valid")
});
/// pytest-cov terminal table rows: `path   stmts   miss   cover%`
static COV_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(\d+)\s+(\d+)\s+(?:\d+\s+\d+\s+)?(\d+)%").expect("coverage row pattern is valid")
});

pub struct PythonRunner {
    ctx: RunnerContext,
    package_manager: &'static str,
}

impl PythonRunner {
    pub fn new(ctx: RunnerContext) -> Self {
        let package_manager = detect_python_package_manager(&ctx.project_dir);
        Self {
            ctx,
            package_manager,
        }
    }

    pub fn package_manager(&self) -> &str {
        self.package_manager
    }

    fn uses_unittest(&self) -> bool {
        self.framework() == "unittest"
    }

    /// `uv run <tool>`, `poetry run <tool>` or the bare tool.
    fn tool(&self, tool: &str) -> CommandLine {
        match self.package_manager {
            "uv" | "poetry" => CommandLine::new(self.package_manager).args(["run", tool]),
            _ => CommandLine::new(tool),
        }
    }

    fn pytest_command(&self, test_type: TestType, coverage: bool) -> CommandLine {
        let mut command = self.tool("pytest");

        if !test_type.is_all() {
            let markers = self
                .ctx
                .config
                .type_config(test_type)
                .map(|c| c.markers.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| vec![test_type.to_string()]);
            for marker in markers {
                command = command.args(["-m".to_string(), marker]);
            }
        }

        if coverage {
            command = command.arg("--cov");
            if let Some(source) = self
                .ctx
                .config
                .coverage
                .as_ref()
                .and_then(|c| c.source.as_deref())
            {
                command = command.arg(format!("--cov={}", source));
            }
        }

        command.arg("-v")
    }

    fn unittest_command(&self, test_type: TestType, coverage: bool) -> CommandLine {
        let mut command = if coverage {
            self.tool("coverage").args(["run", "-m", "unittest", "discover"])
        } else {
            self.tool("python").args(["-m", "unittest", "discover"])
        };

        if !test_type.is_all() {
            let sub = format!("tests/{}", test_type);
            if self.ctx.project_dir.join(&sub).is_dir() {
                command = command.arg("-s").arg(sub);
            }
        }

        command
    }
}

impl TestRunner for PythonRunner {
    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn build_command(&self, test_type: TestType, coverage: bool) -> RunnerResult<CommandLine> {
        if let Some(explicit) = self.ctx.explicit_command(test_type) {
            return explicit;
        }
        Ok(if self.uses_unittest() {
            self.unittest_command(test_type, coverage)
        } else {
            self.pytest_command(test_type, coverage)
        })
    }

    fn parse_output(&self, output: &str, result: &mut TestResult) {
        let unittest = self.uses_unittest();
        let mut coverage_files = Vec::new();
        let mut coverage_total = None;

        for line in output.lines().map(str::trim) {
            if unittest {
                parse_unittest_line(line, result);
            } else {
                parse_pytest_line(line, result);
            }

            if let Some(caps) = COV_ROW.captures(line) {
                let (Ok(stmts), Ok(miss)) = (caps[2].parse::<u64>(), caps[3].parse::<u64>()) else {
                    continue;
                };
                let metric = CoverageMetric::new(stmts.saturating_sub(miss), stmts);
                if &caps[1] == "TOTAL" {
                    coverage_total = Some(metric);
                } else if caps[1].ends_with(".py") {
                    let mut file = FileCoverage::new(&caps[1]);
                    file.lines = metric;
                    coverage_files.push(file);
                }
            }
        }

        if let Some(total) = coverage_total {
            result.coverage = Some(CoverageData {
                lines: total,
                files: coverage_files,
                ..Default::default()
            });
        }

        if result.total == 0 {
            if output.contains("PASSED") || output.contains("OK") {
                result.passed = 1;
                result.total = 1;
            } else if output.contains("FAILED") || output.contains("ERROR") {
                result.failed = 1;
                result.total = 1;
            }
        }
    }

    fn has_tests(&self) -> bool {
        let dir = &self.ctx.project_dir;
        if dir.join("tests").is_dir() || dir.join("test").is_dir() {
            return true;
        }
        fs::read_dir(dir)
            .map(|entries| {
                entries.filter_map(Result::ok).any(|entry| {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    entry.path().is_file()
                        && name.ends_with(".py")
                        && (name.starts_with("test_") || name.ends_with("_test.py"))
                })
            })
            .unwrap_or(false)
    }
}

/// `=== 3 passed, 1 failed, 1 skipped in 1.23s ===` and `FAILED path::name - msg`.
fn parse_pytest_line(line: &str, result: &mut TestResult) {
    if let Some(caps) = PYTEST_FAILURE.captures(line) {
        let message = caps.get(3).map(|m| m.as_str()).unwrap_or("test failed");
        result
            .failures
            .push(TestFailure::new(&caps[2], message).with_location(&caps[1], None));
        return;
    }

    let is_summary = PYTEST_SUMMARY.is_match(line) && PYTEST_DURATION.is_match(line);
    if !is_summary {
        return;
    }

    let body = line.trim_matches(|c: char| c == '=' || c.is_whitespace());
    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for part in body.split(',').map(str::trim) {
        if let Some(n) = count_before(part, "passed") {
            passed = n;
        } else if let Some(n) = count_before(part, "failed") {
            failed += n;
        } else if let Some(n) = count_before(part, "skipped") {
            skipped = n;
        } else if let Some(n) = count_before(part, "error") {
            failed += n;
        }
    }

    result.passed = passed;
    result.failed = failed;
    result.skipped = skipped;
    result.total = passed + failed + skipped;
    if let Some(secs) = capture_f64(&PYTEST_DURATION, line) {
        result.duration = secs;
    }
}

/// `Ran 5 tests in 0.012s` followed by `OK` or `FAILED (failures=1, errors=1)`.
fn parse_unittest_line(line: &str, result: &mut TestResult) {
    if let Some(total) = capture_usize(&UNITTEST_RAN, line) {
        result.total = total;
        if let Some(secs) = capture_f64(&PYTEST_DURATION, line) {
            result.duration = secs;
        }
        return;
    }

    if let Some(caps) = UNITTEST_FAILURE.captures(line) {
        result.failures.push(TestFailure::new(
            format!("{}.{}", &caps[2], &caps[1]),
            "test failed",
        ));
        return;
    }

    if line == "OK" || line.starts_with("OK (") {
        result.skipped = capture_usize(&UNITTEST_SKIPPED, line).unwrap_or(0);
        result.passed = result.total.saturating_sub(result.skipped);
        result.failed = 0;
    } else if line.starts_with("FAILED") {
        result.failed = capture_usize(&UNITTEST_FAILURES, line).unwrap_or(0)
            + capture_usize(&UNITTEST_ERRORS, line).unwrap_or(0);
        result.skipped = capture_usize(&UNITTEST_SKIPPED, line).unwrap_or(0);
        result.passed = result
            .total
            .saturating_sub(result.failed)
            .saturating_sub(result.skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, MockExecutor};
    use model::{CoverageConfig, ServiceTestConfig, TestTypeConfig};
    use tempfile::TempDir;

    fn runner(dir: &TempDir, config: ServiceTestConfig) -> PythonRunner {
        PythonRunner::new(context(dir.path(), config, MockExecutor::with_output("", 0)))
    }

    fn parse(framework: &str, output: &str) -> TestResult {
        let dir = TempDir::new().unwrap();
        let mut result = TestResult::new(TestType::All);
        runner(&dir, ServiceTestConfig::with_framework(framework)).parse_output(output, &mut result);
        result
    }

    #[test]
    fn test_pytest_summary_dialects() {
        let cases = [
            ("===== 5 passed in 1.23s =====", (5, 0, 0, 5, 1.23)),
            ("4 passed, 1 failed in 0.50s", (4, 1, 0, 5, 0.5)),
            (
                "======= 3 passed, 1 failed, 1 skipped, 2 warnings in 2.00s ========",
                (3, 1, 1, 5, 2.0),
            ),
            ("1 failed, 2 passed, 1 error in 0.10s", (2, 2, 0, 4, 0.1)),
        ];
        for (line, (passed, failed, skipped, total, duration)) in cases {
            let result = parse("pytest", line);
            assert_eq!(
                (result.passed, result.failed, result.skipped, result.total),
                (passed, failed, skipped, total),
                "{line}"
            );
            assert_eq!(result.duration, duration, "{line}");
        }
    }

    #[test]
    fn test_pytest_ignores_per_test_lines() {
        let output = "\
tests/test_math.py::test_add PASSED                     [ 50%]
tests/test_math.py::test_sub FAILED                     [100%]
FAILED tests/test_math.py::test_sub - assert 1 == 2
========== 1 passed, 1 failed in 0.03s ==========
";
        let result = parse("pytest", output);
        assert_eq!((result.passed, result.failed, result.total), (1, 1, 2));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "test_sub");
        assert_eq!(result.failures[0].message, "assert 1 == 2");
        assert_eq!(result.failures[0].file.as_deref(), Some("tests/test_math.py"));
    }

    #[test]
    fn test_pytest_multibyte_names() {
        let output = "\
tests/test_café.py::test_ünïcode_passed PASSED            [ 50%]
tests/test_café.py::test_naïve_failed FAILED              [100%]
FAILED tests/test_café.py::test_naïve_failed - assert 'é' == 'e'
========== 1 passed, 1 failed in 0.05s ==========
";
        let result = parse("pytest", output);
        assert_eq!((result.passed, result.failed, result.total), (1, 1, 2));
        assert_eq!(result.failures[0].name, "test_naïve_failed");
        assert_eq!(result.failures[0].message, "assert 'é' == 'e'");
        assert_eq!(result.failures[0].file.as_deref(), Some("tests/test_café.py"));
    }

    #[test]
    fn test_unittest_summary() {
        let output = "\
FAIL: test_sub (tests.test_math.MathTest)
----------------------------------------------------------------------
Ran 5 tests in 0.012s

FAILED (failures=1, errors=1)
";
        let result = parse("unittest", output);
        assert_eq!((result.passed, result.failed, result.total), (3, 2, 5));
        assert_eq!(result.duration, 0.012);
        assert_eq!(result.failures[0].name, "tests.test_math.MathTest.test_sub");

        let ok = parse("unittest", "Ran 4 tests in 0.1s\n\nOK (skipped=1)\n");
        assert_eq!((ok.passed, ok.skipped, ok.failed, ok.total), (3, 1, 0, 4));
    }

    #[test]
    fn test_pytest_cov_table() {
        let output = "\
Name              Stmts   Miss  Cover
-------------------------------------
src/app.py           20      5    75%
src/util.py          10      0   100%
-------------------------------------
TOTAL                30      5    83%
===== 2 passed in 0.20s =====
";
        let coverage = parse("pytest", output).coverage.unwrap();
        assert_eq!(coverage.lines.covered, 25);
        assert_eq!(coverage.lines.total, 30);
        assert_eq!(coverage.files.len(), 2);
        assert_eq!(coverage.files[0].lines.covered, 15);
    }

    #[test]
    fn test_fallback_indicators() {
        assert_eq!(parse("pytest", "test_x PASSED").passed, 1);
        assert_eq!(parse("pytest", "collected 0 items / 1 ERROR").failed, 1);
    }

    #[test]
    fn test_pytest_commands() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("uv.lock"), "").unwrap();

        let mut config = ServiceTestConfig::with_framework("pytest");
        config.integration = Some(TestTypeConfig::with_markers(vec![
            "integration".to_string(),
            "db".to_string(),
        ]));
        config.coverage = Some(CoverageConfig {
            enabled: true,
            source: Some("src".to_string()),
            ..Default::default()
        });
        let runner = runner(&dir, config);

        assert_eq!(
            runner.build_command(TestType::Unit, false).unwrap().to_string(),
            "uv run pytest -m unit -v"
        );
        assert_eq!(
            runner
                .build_command(TestType::Integration, true)
                .unwrap()
                .to_string(),
            "uv run pytest -m integration -m db --cov --cov=src -v"
        );
        assert_eq!(
            runner.build_command(TestType::All, false).unwrap().to_string(),
            "uv run pytest -v"
        );
    }

    #[test]
    fn test_unittest_commands() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tests/unit")).unwrap();
        let runner = runner(&dir, ServiceTestConfig::with_framework("unittest"));

        assert_eq!(
            runner.build_command(TestType::Unit, false).unwrap().to_string(),
            "python -m unittest discover -s tests/unit"
        );
        assert_eq!(
            runner.build_command(TestType::E2e, true).unwrap().to_string(),
            "coverage run -m unittest discover"
        );
    }

    #[test]
    fn test_has_tests() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir, ServiceTestConfig::with_framework("pytest"));
        assert!(!runner.has_tests());
        std::fs::write(dir.path().join("app_test.py"), "").unwrap();
        assert!(runner.has_tests());
    }
}
