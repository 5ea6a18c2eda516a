//! Jest, Vitest and Mocha through the project's package manager.

use crate::command::CommandLine;
use crate::detect::{detect_node_package_manager, project_files};
use crate::parse::{capture_f64, capture_usize, count_before};
use crate::{RunnerContext, RunnerResult, TestRunner};
use model::{CoverageData, CoverageMetric, TestFailure, TestResult, TestType};
use regex::Regex;
use std::sync::LazyLock;

static JEST_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Time:\s*([\d.]+)\s*s").expect("jest time pattern is valid"));
static VITEST_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Duration\s+([\d.]+)\s*(ms|s)\b").expect("vitest duration pattern is valid")
});
static VITEST_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)\)").expect("vitest total pattern is valid"));
static MOCHA_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"passing\s*\((\d+)(ms|s)\)").expect("mocha duration pattern is valid")
});
static ISTANBUL_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^All files\s*\|\s*([\d.]+)\s*\|\s*([\d.]+)\s*\|\s*([\d.]+)\s*\|\s*([\d.]+)")
        .expect("istanbul summary pattern is valid")
});
static JEST_FAILURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^●\s+(.+)$").expect("jest failure pattern is valid"));
static VITEST_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAIL|×|✗)\s+(\S+\.[cm]?[jt]sx?)\s+>\s+(.+)$")
        .expect("vitest failure pattern is valid")
});

const TEST_FILE_SUFFIXES: &[&str] = &[".test.js", ".test.ts", ".spec.js", ".spec.ts", ".test.jsx", ".test.tsx"];

pub struct NodeRunner {
    ctx: RunnerContext,
    package_manager: &'static str,
}

impl NodeRunner {
    pub fn new(ctx: RunnerContext) -> Self {
        let package_manager = detect_node_package_manager(&ctx.project_dir);
        Self {
            ctx,
            package_manager,
        }
    }

    pub fn package_manager(&self) -> &str {
        self.package_manager
    }

    fn type_filter(&self, test_type: TestType) -> Option<String> {
        if test_type.is_all() {
            return None;
        }
        let configured = self
            .ctx
            .config
            .type_config(test_type)
            .and_then(|c| c.pattern.clone());
        Some(configured.unwrap_or_else(|| test_type.to_string()))
    }
}

impl TestRunner for NodeRunner {
    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn build_command(&self, test_type: TestType, coverage: bool) -> RunnerResult<CommandLine> {
        if let Some(explicit) = self.ctx.explicit_command(test_type) {
            return explicit;
        }

        let filter = self.type_filter(test_type);
        let mut command = CommandLine::new(self.package_manager).arg("test");

        match self.framework() {
            "jest" => {
                if let Some(pattern) = filter {
                    command = command.args(["--".to_string(), format!("--testPathPattern={}", pattern)]);
                }
                if coverage {
                    command = command.arg("--coverage");
                }
            }
            "vitest" => {
                command = command.arg("--run");
                if let Some(pattern) = filter {
                    command = command.arg(format!("--testNamePattern={}", pattern));
                }
                if coverage {
                    command = command.arg("--coverage");
                }
            }
            "mocha" => {
                if let Some(pattern) = filter {
                    command = command.arg(format!("test/{}/**/*.test.js", pattern));
                }
            }
            _ => {}
        }

        Ok(command)
    }

    fn parse_output(&self, output: &str, result: &mut TestResult) {
        let mut mocha_seen = false;
        let lines: Vec<&str> = output.lines().map(str::trim).collect();

        for (i, line) in lines.iter().enumerate() {
            if let Some(summary) = line.strip_prefix("Tests:") {
                parse_jest_summary(summary, result);
            } else if let Some(summary) = line.strip_prefix("Tests ") {
                parse_vitest_summary(summary, result);
            }

            if line.contains(" passing") || line.contains(" failing") || line.contains(" pending") {
                mocha_seen |= parse_mocha_line(line, result);
            }

            if line.contains("Time:") {
                if let Some(secs) = capture_f64(&JEST_TIME, line) {
                    result.duration = secs;
                }
            }
            if let Some(caps) = VITEST_DURATION.captures(line) {
                if let Ok(value) = caps[1].parse::<f64>() {
                    result.duration = if &caps[2] == "ms" { value / 1000.0 } else { value };
                }
            }

            if let Some(caps) = JEST_FAILURE.captures(line) {
                let name = caps[1].trim().to_string();
                if !name.starts_with("Console") && !result.failures.iter().any(|f| f.name == name) {
                    let message = next_message(&lines[i + 1..]);
                    result.failures.push(TestFailure::new(name, message));
                }
            } else if let Some(caps) = VITEST_FAILURE.captures(line) {
                let name = caps[2].trim().to_string();
                if !result.failures.iter().any(|f| f.name == name) {
                    let message = next_message(&lines[i + 1..]);
                    result
                        .failures
                        .push(TestFailure::new(name, message).with_location(&caps[1], None));
                }
            }

            if let Some(caps) = ISTANBUL_SUMMARY.captures(line) {
                let pct = |idx: usize| caps[idx].parse::<f64>().unwrap_or(0.0);
                result.coverage = Some(CoverageData {
                    lines: CoverageMetric::from_percent(pct(4)),
                    branches: CoverageMetric::from_percent(pct(2)),
                    functions: CoverageMetric::from_percent(pct(3)),
                    files: Vec::new(),
                });
            }
        }

        if mocha_seen && result.total == 0 {
            result.total = result.passed + result.failed + result.skipped;
        }

        if result.total == 0 {
            if output.contains("PASS") || output.contains('✓') {
                result.passed = 1;
                result.total = 1;
            } else if output.contains("FAIL") || output.contains('✗') {
                result.failed = 1;
                result.total = 1;
            }
        }
    }

    fn has_tests(&self) -> bool {
        let dir = &self.ctx.project_dir;
        for sub in ["test", "tests", "__tests__"] {
            if dir.join(sub).is_dir() {
                return true;
            }
        }

        let has_test_files = project_files(dir).any(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| TEST_FILE_SUFFIXES.iter().any(|s| n.ends_with(s)))
        });
        if has_test_files {
            return true;
        }

        std::fs::read_to_string(dir.join("package.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .is_some_and(|pkg| pkg.pointer("/scripts/test").is_some())
    }
}

fn parse_jest_summary(summary: &str, result: &mut TestResult) {
    for part in summary.split(',').map(str::trim) {
        if let Some(n) = count_before(part, "passed") {
            result.passed = n;
        } else if let Some(n) = count_before(part, "failed") {
            result.failed = n;
        } else if let Some(n) = count_before(part, "skipped") {
            result.skipped = n;
        } else if let Some(n) = count_before(part, "todo") {
            result.skipped += n;
        } else if let Some(n) = count_before(part, "total") {
            result.total = n;
        }
    }
}

/// `Tests  2 passed | 1 failed | 1 skipped (4)`
fn parse_vitest_summary(summary: &str, result: &mut TestResult) {
    let mut matched = false;
    for part in summary.split('|').map(str::trim) {
        if let Some(n) = count_before(part, "passed") {
            result.passed = n;
            matched = true;
        }
        if let Some(n) = count_before(part, "failed") {
            result.failed = n;
            matched = true;
        }
        if let Some(n) = count_before(part, "skipped") {
            result.skipped = n;
            matched = true;
        }
    }
    if !matched {
        return;
    }
    result.total = capture_usize(&VITEST_TOTAL, summary)
        .unwrap_or(result.passed + result.failed + result.skipped);
}

/// Returns whether the line was a mocha summary line.
fn parse_mocha_line(line: &str, result: &mut TestResult) -> bool {
    let mut seen = false;
    if let Some(n) = count_before(line, "passing") {
        result.passed = n;
        seen = true;
        if let Some(caps) = MOCHA_DURATION.captures(line) {
            if let Ok(value) = caps[1].parse::<f64>() {
                result.duration = if &caps[2] == "ms" { value / 1000.0 } else { value };
            }
        }
    }
    if let Some(n) = count_before(line, "failing") {
        result.failed = n;
        seen = true;
    }
    if let Some(n) = count_before(line, "pending") {
        result.skipped = n;
        seen = true;
    }
    if seen {
        result.total = result.passed + result.failed + result.skipped;
    }
    seen
}

fn next_message(rest: &[&str]) -> String {
    rest.iter()
        .find(|l| !l.is_empty())
        .map(|l| l.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, MockExecutor};
    use model::{ServiceTestConfig, TestTypeConfig};
    use std::fs;
    use tempfile::TempDir;

    fn runner(dir: &TempDir, framework: &str) -> NodeRunner {
        NodeRunner::new(context(
            dir.path(),
            ServiceTestConfig::with_framework(framework),
            MockExecutor::with_output("", 0),
        ))
    }

    fn parse(framework: &str, output: &str) -> TestResult {
        let dir = TempDir::new().unwrap();
        let mut result = TestResult::new(TestType::All);
        runner(&dir, framework).parse_output(output, &mut result);
        result
    }

    #[test]
    fn test_jest_summary_dialects() {
        let cases = [
            ("Tests:       3 passed, 1 failed, 2 skipped, 6 total", (3, 1, 2, 6)),
            ("Tests:  5 passed, 5 total", (5, 0, 0, 5)),
            ("Tests:  1 failed, 1 todo, 4 passed, 6 total", (4, 1, 1, 6)),
        ];
        for (line, (passed, failed, skipped, total)) in cases {
            let result = parse("jest", line);
            assert_eq!(
                (result.passed, result.failed, result.skipped, result.total),
                (passed, failed, skipped, total),
                "{line}"
            );
        }
    }

    #[test]
    fn test_jest_time_and_failures() {
        let output = "\
FAIL src/math.test.js
  ● math › subtracts

    expect(received).toBe(expected)

Tests:       1 passed, 1 failed, 2 total
Time:        2.456 s
";
        let result = parse("jest", output);
        assert_eq!(result.duration, 2.456);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "math › subtracts");
        assert_eq!(result.failures[0].message, "expect(received).toBe(expected)");
    }

    #[test]
    fn test_multibyte_titles_near_summary_keywords() {
        let mocha = parse(
            "mocha",
            "  Orders\n    ✓ pending orders are listed\n    ✓ 支払い passing through\n\n  2 passing (5ms)\n",
        );
        assert_eq!((mocha.passed, mocha.skipped, mocha.total), (2, 0, 2));
        assert_eq!(mocha.duration, 0.005);

        let jest = parse(
            "jest",
            "  ● Größe › berechnet Fläche\n\n    expect(received).toBe(expected)\n\nTests:       1 failed, 2 passed, 3 total\n",
        );
        assert_eq!((jest.passed, jest.failed, jest.total), (2, 1, 3));
        assert_eq!(jest.failures[0].name, "Größe › berechnet Fläche");
    }

    #[test]
    fn test_vitest_summary() {
        let output = "\
 FAIL  src/a.test.ts > math > divides
AssertionError: expected 1 to be 2
 Test Files  1 failed | 2 passed (3)
      Tests  2 passed | 1 failed (3)
   Duration  1.23s (transform 20ms)
";
        let result = parse("vitest", output);
        assert_eq!((result.passed, result.failed, result.total), (2, 1, 3));
        assert_eq!(result.duration, 1.23);
        assert_eq!(result.failures[0].name, "math > divides");
        assert_eq!(result.failures[0].file.as_deref(), Some("src/a.test.ts"));
    }

    #[test]
    fn test_mocha_summary() {
        let output = "\n  4 passing (10ms)\n  1 failing\n  2 pending\n";
        let result = parse("mocha", output);
        assert_eq!((result.passed, result.failed, result.skipped), (4, 1, 2));
        assert_eq!(result.total, 7);
        assert_eq!(result.duration, 0.01);
    }

    #[test]
    fn test_fallback_indicators() {
        assert_eq!(parse("npm", "PASS src/app.test.js").passed, 1);
        let failed = parse("npm", "FAIL src/app.test.js");
        assert_eq!((failed.failed, failed.total), (1, 1));
        assert_eq!(parse("npm", "nothing useful").total, 0);
    }

    #[test]
    fn test_istanbul_coverage_summary() {
        let output = "\
All files |   85.71 |    66.67 |     100 |   85.71 |
Tests:       2 passed, 2 total
";
        let coverage = parse("jest", output).coverage.unwrap();
        assert_eq!(coverage.lines.percent, 85.71);
        assert_eq!(coverage.branches.percent, 66.67);
        assert_eq!(coverage.functions.percent, 100.0);
    }

    #[test]
    fn test_default_commands() {
        let dir = TempDir::new().unwrap();
        let jest = runner(&dir, "jest");
        assert_eq!(
            jest.build_command(TestType::Unit, true).unwrap().to_string(),
            "npm test -- --testPathPattern=unit --coverage"
        );
        assert_eq!(
            jest.build_command(TestType::All, false).unwrap().to_string(),
            "npm test"
        );

        let vitest = runner(&dir, "vitest");
        assert_eq!(
            vitest
                .build_command(TestType::Integration, false)
                .unwrap()
                .to_string(),
            "npm test --run --testNamePattern=integration"
        );

        let mocha = runner(&dir, "mocha");
        assert_eq!(
            mocha.build_command(TestType::E2e, true).unwrap().to_string(),
            "npm test test/e2e/**/*.test.js"
        );
    }

    #[test]
    fn test_package_manager_prefix_and_explicit_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();

        let mut config = ServiceTestConfig::with_framework("jest");
        config.e2e = Some(TestTypeConfig {
            command: Some("pnpm exec playwright test --project 'chromium'".to_string()),
            ..Default::default()
        });
        let runner = NodeRunner::new(context(dir.path(), config, MockExecutor::with_output("", 0)));

        assert_eq!(runner.package_manager(), "pnpm");
        assert_eq!(
            runner.build_command(TestType::Unit, false).unwrap().to_string(),
            "pnpm test -- --testPathPattern=unit"
        );
        let e2e = runner.build_command(TestType::E2e, false).unwrap();
        assert_eq!(e2e.program, "pnpm");
        assert_eq!(e2e.args, vec!["exec", "playwright", "test", "--project", "chromium"]);
    }

    #[test]
    fn test_has_tests() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir, "jest");
        assert!(!runner.has_tests());

        fs::write(dir.path().join("package.json"), r#"{"scripts": {"build": "tsc"}}"#).unwrap();
        assert!(!runner.has_tests());

        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/app.spec.ts"), "").unwrap();
        assert!(runner.has_tests());
    }

    #[tokio::test]
    async fn test_failing_run_with_results() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::with_output(
            "\x1b[1mTests:\x1b[22m       \x1b[31m1 failed\x1b[39m, 3 passed, 4 total\n",
            1,
        );
        let runner = NodeRunner::new(context(
            dir.path(),
            ServiceTestConfig::with_framework("jest"),
            executor,
        ));

        let result = runner.run_tests(TestType::Unit, false).await.unwrap();
        assert!(!result.success);
        assert_eq!((result.passed, result.failed, result.total), (3, 1, 4));
        assert!(result.error.is_some());
    }
}
