//! Language-specific test runners.
//!
//! A runner turns a service's configuration into one external command, runs it
//! through a [`CommandExecutor`], and folds the tool's text output into a
//! [`TestResult`]. Test failures are data, not errors: a runner only returns
//! [`RunnerError::ExecutionFailed`] when the tool produced nothing parseable.

pub mod command;
pub mod detect;
pub mod dotnet;
pub mod executor;
pub mod go;
pub mod node;
pub mod parse;
pub mod python;

use async_trait::async_trait;
use model::{Language, ServiceInfo, ServiceTestConfig, TestResult, TestType};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

pub use command::{tokenize, CommandLine};
pub use detect::resolve_test_config;
pub use dotnet::DotnetRunner;
pub use executor::{CommandExecutor, CommandOutput, Echo, ProcessExecutor};
pub use go::GoRunner;
pub use node::NodeRunner;
pub use python::PythonRunner;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The tool could not start or produced no parseable results
    #[error("test execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// No runner exists for the service's language
    #[error("unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    /// The project lacks the files needed to pick a framework
    #[error("framework detection failed: {reason}")]
    DetectionFailed { reason: String },

    /// A configured command string held no program
    #[error("command is empty")]
    EmptyCommand,

    /// Filesystem or pipe failure while running a command
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Everything a runner needs to execute one service.
#[derive(Clone)]
pub struct RunnerContext {
    pub service: String,
    pub project_dir: PathBuf,
    pub config: ServiceTestConfig,
    pub executor: Arc<dyn CommandExecutor>,
}

impl RunnerContext {
    pub fn new(
        service: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        config: ServiceTestConfig,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            service: service.into(),
            project_dir: project_dir.into(),
            config,
            executor,
        }
    }

    /// The configured command for `test_type`, if one was declared.
    pub fn explicit_command(&self, test_type: TestType) -> Option<RunnerResult<CommandLine>> {
        self.config
            .type_config(test_type)
            .and_then(|c| c.explicit_command())
            .map(CommandLine::parse)
    }
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("service", &self.service)
            .field("project_dir", &self.project_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    fn context(&self) -> &RunnerContext;

    /// Framework name used to build and parse commands.
    fn framework(&self) -> &str {
        &self.context().config.framework
    }

    fn build_command(&self, test_type: TestType, coverage: bool) -> RunnerResult<CommandLine>;

    /// Fold ANSI-stripped tool output into `result`.
    fn parse_output(&self, output: &str, result: &mut TestResult);

    /// Clear coverage artifacts a previous run may have left behind.
    fn prepare_coverage(&self) {}

    /// Attach coverage gathered outside of stdout, such as a profile file.
    fn collect_coverage(&self, _result: &mut TestResult) {}

    /// Cheap probe for whether the project contains any tests at all.
    fn has_tests(&self) -> bool;

    async fn run_tests(&self, test_type: TestType, coverage: bool) -> RunnerResult<TestResult> {
        let ctx = self.context();
        let command = self
            .build_command(test_type, coverage)?
            .with_label(ctx.service.clone());
        info!(service = %ctx.service, command = %command, "running tests");
        if coverage {
            self.prepare_coverage();
        }

        let started = Instant::now();
        let (output, exec_error) = match ctx.executor.execute(&command, &ctx.project_dir).await {
            Ok(out) if out.success() => (out.output, None),
            Ok(out) => {
                let reason = match out.status {
                    Some(code) => format!("`{}` exited with status {}", command, code),
                    None => format!("`{}` was terminated by a signal", command),
                };
                (out.output, Some(reason))
            }
            Err(e) => (String::new(), Some(e.to_string())),
        };

        let mut result = TestResult::new(test_type).with_service(ctx.service.clone());
        self.parse_output(&parse::strip_ansi(&output), &mut result);
        if coverage {
            self.collect_coverage(&mut result);
        }
        if result.duration == 0.0 {
            result.duration = started.elapsed().as_secs_f64();
        }

        classify_outcome(result, exec_error)
    }
}

/// Decide whether a finished run is a test result or an execution error.
///
/// A failing exit with parsed tests is an ordinary failing result. Only a run
/// with nothing parsed is an error.
pub fn classify_outcome(
    mut result: TestResult,
    exec_error: Option<String>,
) -> RunnerResult<TestResult> {
    match exec_error {
        None => {
            result.complete();
            Ok(result)
        }
        Some(reason) if result.has_results() => {
            debug!(service = %result.service, %reason, "tool exited non-zero with results");
            result.success = false;
            result.error = Some(reason);
            Ok(result)
        }
        Some(reason) => Err(RunnerError::ExecutionFailed { reason }),
    }
}

/// Build the runner for a service's language.
pub fn create_runner(
    service: &ServiceInfo,
    config: ServiceTestConfig,
    executor: Arc<dyn CommandExecutor>,
) -> RunnerResult<Box<dyn TestRunner>> {
    let language = service
        .language_kind()
        .ok_or_else(|| RunnerError::UnsupportedLanguage {
            language: service.language.clone(),
        })?;
    let ctx = RunnerContext::new(service.name.clone(), service.dir.clone(), config, executor);

    Ok(match language {
        Language::Node => Box::new(NodeRunner::new(ctx)),
        Language::Python => Box::new(PythonRunner::new(ctx)),
        Language::Go => Box::new(GoRunner::new(ctx)),
        Language::Dotnet => Box::new(DotnetRunner::new(ctx)),
    })
}

pub mod prelude {
    pub use crate::command::*;
    pub use crate::executor::*;
    pub use crate::{
        classify_outcome, create_runner, RunnerContext, RunnerError, RunnerResult, TestRunner,
    };
}


#[cfg(test)]
mod tests {
    use super::testing::MockExecutor;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_clean_exit() {
        let mut result = TestResult::new(TestType::Unit);
        result.passed = 2;
        result.total = 2;
        let result = classify_outcome(result, None).unwrap();
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_classify_failing_exit_with_results_is_not_error() {
        let mut result = TestResult::new(TestType::Unit);
        result.passed = 1;
        result.failed = 1;
        result.total = 2;
        let result = classify_outcome(result, Some("exit status 1".to_string())).unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("exit status 1"));
    }

    #[test]
    fn test_classify_failing_exit_without_results_is_error() {
        let result = TestResult::new(TestType::Unit);
        let err = classify_outcome(result, Some("command not found".to_string())).unwrap_err();
        assert!(matches!(err, RunnerError::ExecutionFailed { .. }));
        assert!(err.to_string().contains("command not found"));
    }

    #[test]
    fn test_create_runner_dispatch() {
        let executor = MockExecutor::with_output("", 0);
        let service = ServiceInfo::new("web", "typescript", "/tmp/web");
        let runner = create_runner(&service, ServiceTestConfig::with_framework("jest"), executor.clone())
            .unwrap();
        assert_eq!(runner.framework(), "jest");
        assert_eq!(runner.context().service, "web");

        let ruby = ServiceInfo::new("tool", "ruby", "/tmp/tool");
        assert!(matches!(
            create_runner(&ruby, ServiceTestConfig::default(), executor),
            Err(RunnerError::UnsupportedLanguage { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_tests_start_failure_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(MockExecutor {
            fail_to_start: true,
            ..Default::default()
        });
        let service = ServiceInfo::new("api", "go", dir.path());
        let runner = create_runner(&service, ServiceTestConfig::with_framework("gotest"), executor)
            .unwrap();

        let err = runner.run_tests(TestType::All, false).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_run_tests_labels_command_with_service() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::with_output("--- PASS: TestAdd (0.01s)\nok  \texample.com/api\t0.02s\n", 0);
        let service = ServiceInfo::new("api", "go", dir.path());
        let runner = create_runner(&service, ServiceTestConfig::with_framework("gotest"), executor.clone())
            .unwrap();

        let result = runner.run_tests(TestType::Unit, false).await.unwrap();
        assert_eq!(result.service, "api");
        assert!(result.success);
        assert_eq!(result.passed, 1);
        assert_eq!(
            executor.last_call().unwrap().label.as_deref(),
            Some("api")
        );
    }
}
