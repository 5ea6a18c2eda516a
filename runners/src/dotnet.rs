use crate::command::CommandLine;
use crate::detect::find_dotnet_test_projects;
use crate::parse::{capture_usize, extract_number};
use crate::{RunnerContext, RunnerResult, TestRunner};
use model::{TestFailure, TestResult, TestType};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Failed:\s*(\d+)").expect("failed count pattern is valid"));
static PASSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Passed:\s*(\d+)").expect("passed count pattern is valid"));
static SKIPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Skipped:\s*(\d+)").expect("skipped count pattern is valid"));
static TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total:\s*(\d+)").expect("total count pattern is valid"));
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*([\d.]+)\s*(ms|s)\b").expect("duration pattern is valid")
});
/// `Failed Namespace.Class.Method [12 ms]`
static FAILED_TEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Failed (\S+) \[[^\]]*\]$").expect("failed test pattern is valid")
});
static STACK_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" in (\S+\.[cf]s):line (\d+)").expect("stack location pattern is valid")
});

pub struct DotnetRunner {
    ctx: RunnerContext,
}

impl DotnetRunner {
    pub fn new(ctx: RunnerContext) -> Self {
        Self { ctx }
    }

    /// Configured unit-test projects, otherwise discovered `*test*` project files.
    pub fn test_projects(&self) -> Vec<PathBuf> {
        let configured = self
            .ctx
            .config
            .unit
            .as_ref()
            .map(|u| u.projects.as_slice())
            .unwrap_or(&[]);
        if !configured.is_empty() {
            return configured
                .iter()
                .map(|p| self.ctx.project_dir.join(p))
                .collect();
        }
        find_dotnet_test_projects(&self.ctx.project_dir)
    }

    pub fn test_filter(&self, test_type: TestType) -> Option<String> {
        let configured = self
            .ctx
            .config
            .type_config(test_type)
            .and_then(|c| c.filter.clone())
            .filter(|f| !f.is_empty());
        if configured.is_some() {
            return configured;
        }
        match test_type {
            TestType::Unit => Some("Category=Unit".to_string()),
            TestType::Integration => Some("Category=Integration".to_string()),
            TestType::E2e => Some("Category=E2E".to_string()),
            TestType::All => None,
        }
    }
}

impl TestRunner for DotnetRunner {
    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn build_command(&self, test_type: TestType, coverage: bool) -> RunnerResult<CommandLine> {
        if let Some(explicit) = self.ctx.explicit_command(test_type) {
            return explicit;
        }

        let mut command = CommandLine::new("dotnet").arg("test");
        if let Some(project) = self.test_projects().first() {
            command = command.arg(project.display().to_string());
        }
        if let Some(filter) = self.test_filter(test_type) {
            command = command.arg("--filter").arg(filter);
        }
        if coverage {
            command = command.args(["--collect", "XPlat Code Coverage"]);
        }
        Ok(command.args(["--logger", "console;verbosity=normal"]))
    }

    fn parse_output(&self, output: &str, result: &mut TestResult) {
        let lines: Vec<&str> = output.lines().map(str::trim).collect();

        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("Passed!") || line.starts_with("Failed!") {
                parse_summary(line, result);
                continue;
            }

            if let Some(rest) = line.strip_prefix("Total tests:") {
                if let Some(n) = extract_number(rest) {
                    result.total = n;
                }
            } else if let Some(rest) = line.strip_prefix("Passed:") {
                if let Some(n) = extract_number(rest) {
                    result.passed = n;
                }
            } else if let Some(rest) = line.strip_prefix("Failed:") {
                if let Some(n) = extract_number(rest) {
                    result.failed = n;
                }
            } else if let Some(rest) = line.strip_prefix("Skipped:") {
                if let Some(n) = extract_number(rest) {
                    result.skipped = n;
                }
            } else if let Some(caps) = FAILED_TEST.captures(line) {
                result.failures.push(failure_details(&caps[1], &lines[i + 1..]));
            }
        }

        if result.total == 0 && (result.passed > 0 || result.failed > 0) {
            result.total = result.passed + result.failed + result.skipped;
        }
    }

    fn has_tests(&self) -> bool {
        !self.test_projects().is_empty()
    }
}

/// `Passed!  - Failed: 0, Passed: 10, Skipped: 0, Total: 10, Duration: 123 ms`
fn parse_summary(line: &str, result: &mut TestResult) {
    if let Some(n) = capture_usize(&FAILED, line) {
        result.failed = n;
    }
    if let Some(n) = capture_usize(&PASSED, line) {
        result.passed = n;
    }
    if let Some(n) = capture_usize(&SKIPPED, line) {
        result.skipped = n;
    }
    if let Some(n) = capture_usize(&TOTAL, line) {
        result.total = n;
    }
    if let Some(caps) = DURATION.captures(line) {
        if let Ok(value) = caps[1].parse::<f64>() {
            result.duration = if &caps[2] == "ms" { value / 1000.0 } else { value };
        }
    }
}

/// Collect the `Error Message:` and first stack frame following a failed test line.
fn failure_details(name: &str, rest: &[&str]) -> TestFailure {
    let mut failure = TestFailure::new(name, "test failed");
    let mut lines = rest.iter().take_while(|l| !l.starts_with("Failed ") && !l.starts_with("Passed "));

    while let Some(line) = lines.next() {
        if *line == "Error Message:" {
            if let Some(message) = lines.next() {
                failure.message = message.to_string();
            }
        } else if *line == "Stack Trace:" {
            if let Some(frame) = lines.next() {
                failure.stack_trace = Some(frame.to_string());
                if let Some(caps) = STACK_LOCATION.captures(frame) {
                    failure.file = Some(caps[1].to_string());
                    failure.line = caps[2].parse().ok();
                }
            }
            break;
        }
    }
    failure
}
