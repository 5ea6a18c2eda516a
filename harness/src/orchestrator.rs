//! Test orchestration across services.
//!
//! [`TestOrchestrator`] resolves each service's effective configuration, runs
//! setup commands, executes the language runner under a deadline, always runs
//! teardown, and folds every outcome into one [`AggregateResult`]. Coverage is
//! merged through a [`CoverageAggregator`] and checked against the configured
//! threshold after all services finish.
//!
//! Services run one at a time unless [`TestConfig::parallel`] is set, in which
//! case they run concurrently. Either way results, progress events and
//! coverage are folded in registration order.

use crate::coverage::CoverageAggregator;
use crate::validation::{validate_service_with, ServiceValidation};
use futures::stream::{self, StreamExt};
use model::{AggregateResult, ServiceInfo, TestConfig, TestResult, TestType};
use runners::{
    create_runner, resolve_test_config, CommandExecutor, CommandLine, ProcessExecutor, RunnerError,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The service filter matched nothing, or nothing is registered
    #[error("no services to test")]
    NoServices,

    /// Global test settings failed validation
    #[error("invalid test configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No effective test configuration could be resolved for a service
    #[error("failed to detect test config: {0}")]
    Detection(#[source] RunnerError),

    /// A setup command could not be parsed, started, or exited non-zero
    #[error("setup failed: `{command}`: {reason}")]
    SetupFailed { command: String, reason: String },

    /// A teardown command failed; logged, never returned from a run
    #[error("teardown failed: `{command}`: {reason}")]
    TeardownFailed { command: String, reason: String },

    /// The runner did not finish within the configured timeout
    #[error("test execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Fail-fast abort carrying the first service's execution error
    #[error("test failed for service {service}: {source}")]
    ServiceFailed {
        service: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    /// The runner returned an execution error
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Lifecycle commands declared around a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Teardown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Setup => "setup",
            Stage::Teardown => "teardown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEventKind {
    ValidationStart,
    ServiceValidated,
    ValidationComplete,
    TestStart,
    TestComplete,
    ServiceSkipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    pub service: Option<String>,
    pub framework: Option<String>,
    pub message: Option<String>,
    /// Outcome of a finished service; set on `TestComplete` only
    pub success: Option<bool>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressEventKind) -> Self {
        Self {
            kind,
            service: None,
            framework: None,
            message: None,
            success: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_framework(mut self, framework: Option<String>) -> Self {
        self.framework = framework.filter(|f| !f.is_empty());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

pub struct TestOrchestrator {
    services: Vec<ServiceInfo>,
    config: TestConfig,
    executor: Arc<dyn CommandExecutor>,
    progress: Option<ProgressCallback>,
}

impl TestOrchestrator {
    pub fn new(config: TestConfig) -> Self {
        Self {
            services: Vec::new(),
            config,
            executor: Arc::new(ProcessExecutor::new()),
            progress: None,
        }
    }

    pub fn with_services(mut self, services: Vec<ServiceInfo>) -> Self {
        self.services = services;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Register the single progress callback, replacing any previous one.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn add_service(&mut self, service: ServiceInfo) {
        self.services.push(service);
    }

    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Directories of all registered services, for file watching.
    pub fn service_paths(&self) -> Vec<PathBuf> {
        self.services.iter().map(|s| s.dir.clone()).collect()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }

    /// Services matching `filter` by exact name, in registration order.
    /// An empty filter selects every service.
    fn select(&self, filter: &[String]) -> OrchestratorResult<Vec<&ServiceInfo>> {
        let selected: Vec<&ServiceInfo> = self
            .services
            .iter()
            .filter(|s| filter.is_empty() || filter.contains(&s.name))
            .collect();
        if selected.is_empty() {
            return Err(OrchestratorError::NoServices);
        }
        Ok(selected)
    }

    fn validate_config(&self) -> OrchestratorResult<()> {
        self.config
            .validate()
            .map_err(|reason| OrchestratorError::InvalidConfig { reason })
    }

    /// Validate every registered service, emitting validation progress events.
    pub fn validate_all_services(&self) -> Vec<ServiceValidation> {
        let services: Vec<&ServiceInfo> = self.services.iter().collect();
        self.validate(&services)
    }

    fn validate(&self, services: &[&ServiceInfo]) -> Vec<ServiceValidation> {
        self.emit(
            ProgressEvent::new(ProgressEventKind::ValidationStart)
                .with_message(format!("Analyzing {} services", services.len())),
        );

        let validations: Vec<ServiceValidation> = services
            .iter()
            .map(|service| {
                let validation = validate_service_with(service, Arc::clone(&self.executor));
                let mut event = ProgressEvent::new(ProgressEventKind::ServiceValidated)
                    .with_service(&validation.name)
                    .with_framework(Some(validation.framework.clone()));
                event.message = validation.skip_reason.clone();
                self.emit(event);
                validation
            })
            .collect();

        self.emit(ProgressEvent::new(ProgressEventKind::ValidationComplete));
        validations
    }

    /// Run tests for the services selected by `filter`.
    pub async fn execute_tests(
        &self,
        test_type: TestType,
        filter: &[String],
    ) -> OrchestratorResult<AggregateResult> {
        self.validate_config()?;
        let planned = self
            .select(filter)?
            .into_iter()
            .map(|service| {
                let framework = service.config.as_ref().map(|c| c.framework.clone());
                (service, framework)
            })
            .collect();
        self.run_services(planned, test_type).await
    }

    /// Validate the selected services first and only run the testable ones.
    ///
    /// Untestable services are reported through `ServiceSkipped` events and the
    /// returned validations; they do not count as failures.
    pub async fn execute_tests_with_validation(
        &self,
        test_type: TestType,
        filter: &[String],
    ) -> OrchestratorResult<(AggregateResult, Vec<ServiceValidation>)> {
        self.validate_config()?;
        let selected = self.select(filter)?;
        let validations = self.validate(&selected);

        let mut planned = Vec::new();
        for (service, validation) in selected.into_iter().zip(&validations) {
            if validation.can_test {
                planned.push((service, Some(validation.framework.clone())));
            } else {
                let mut event =
                    ProgressEvent::new(ProgressEventKind::ServiceSkipped).with_service(&service.name);
                event.message = validation.skip_reason.clone();
                self.emit(event);
            }
        }

        if planned.is_empty() {
            info!("no testable services");
            return Ok((AggregateResult::new(), validations));
        }

        let results = self.run_services(planned, test_type).await?;
        Ok((results, validations))
    }

    async fn run_services(
        &self,
        planned: Vec<(&ServiceInfo, Option<String>)>,
        test_type: TestType,
    ) -> OrchestratorResult<AggregateResult> {
        let concurrency = if self.config.parallel {
            planned.len().max(1)
        } else {
            1
        };
        info!(
            services = planned.len(),
            concurrency,
            test_type = %test_type,
            "running tests"
        );

        let mut coverage = self.config.collects_coverage().then(|| {
            CoverageAggregator::new(self.config.coverage_threshold, &self.config.output_dir)
        });
        let mut aggregate = AggregateResult::new();

        let mut outcomes = stream::iter(planned)
            .map(|(service, framework)| async move {
                self.emit(
                    ProgressEvent::new(ProgressEventKind::TestStart)
                        .with_service(&service.name)
                        .with_framework(framework),
                );
                (service, self.execute_service_tests(service, test_type).await)
            })
            .buffered(concurrency)
            .boxed();

        while let Some((service, outcome)) = outcomes.next().await {
            let result = match outcome {
                Ok(result) => result,
                Err(e) if self.config.fail_fast => {
                    return Err(OrchestratorError::ServiceFailed {
                        service: service.name.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(service = %service.name, error = %e, "service tests could not run");
                    TestResult::execution_failure(&service.name, test_type, e.to_string())
                }
            };

            let mut event = ProgressEvent::new(ProgressEventKind::TestComplete)
                .with_service(&service.name)
                .with_message(summarize(&result));
            event.success = Some(result.success);
            self.emit(event);

            if let Some(aggregator) = coverage.as_mut() {
                if result.has_results() || result.coverage.is_some() {
                    if let Err(e) = aggregator.add_coverage(&service.name, result.coverage.clone()) {
                        warn!(service = %service.name, error = %e, "failed to add coverage data");
                    }
                }
            }
            aggregate.push(result);
        }

        if let Some(aggregator) = coverage {
            let summary = aggregator.aggregate();
            if self.config.coverage_gate_enabled() && !summary.met {
                let message = format!(
                    "Coverage {:.1}% is below threshold {:.1}%",
                    summary.percent, self.config.coverage_threshold
                );
                warn!("{message}");
                aggregate.success = false;
                aggregate.error = Some(message);
            }
            aggregator.generate_all_reports();
            aggregate.coverage = Some(summary);
        }

        info!(
            passed = aggregate.passed,
            failed = aggregate.failed,
            skipped = aggregate.skipped,
            success = aggregate.success,
            "test run finished"
        );
        Ok(aggregate)
    }

    /// Run one service: setup, tests under the deadline, then teardown.
    pub async fn execute_service_tests(
        &self,
        service: &ServiceInfo,
        test_type: TestType,
    ) -> OrchestratorResult<TestResult> {
        let config = resolve_test_config(service).map_err(OrchestratorError::Detection)?;
        let teardown = config.teardown_commands(test_type).to_vec();

        self.run_commands(service, config.setup_commands(test_type), Stage::Setup)
            .await?;

        let outcome = self.run_with_timeout(service, config, test_type).await;

        if let Err(e) = self.run_commands(service, &teardown, Stage::Teardown).await {
            warn!(service = %service.name, error = %e, "teardown failed");
        }

        let mut result = outcome?;
        result.service = service.name.clone();
        Ok(result)
    }

    async fn run_with_timeout(
        &self,
        service: &ServiceInfo,
        config: model::ServiceTestConfig,
        test_type: TestType,
    ) -> OrchestratorResult<TestResult> {
        let runner = create_runner(service, config, Arc::clone(&self.executor))?;
        let timeout = self.config.timeout;

        // Dropping the runner future on expiry kills the child process.
        match tokio::time::timeout(
            timeout,
            runner.run_tests(test_type, self.config.collects_coverage()),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(service = %service.name, ?timeout, "test execution timed out");
                Err(OrchestratorError::Timeout { timeout })
            }
        }
    }

    async fn run_commands(
        &self,
        service: &ServiceInfo,
        commands: &[String],
        stage: Stage,
    ) -> OrchestratorResult<()> {
        for raw in commands {
            let failed = |reason: String| match stage {
                Stage::Setup => OrchestratorError::SetupFailed {
                    command: raw.clone(),
                    reason,
                },
                Stage::Teardown => OrchestratorError::TeardownFailed {
                    command: raw.clone(),
                    reason,
                },
            };
            let command = CommandLine::parse(raw)
                .map_err(|e| failed(e.to_string()))?
                .with_label(service.name.clone());
            debug!(service = %service.name, %stage, command = %command, "running lifecycle command");

            let output = self
                .executor
                .execute(&command, &service.dir)
                .await
                .map_err(|e| failed(e.to_string()))?;
            if !output.success() {
                let status = output
                    .status
                    .map(|code| format!("exit status {code}"))
                    .unwrap_or_else(|| "terminated by signal".to_string());
                return Err(failed(format!("{status}: {}", output.output.trim())));
            }
        }
        Ok(())
    }
}

fn summarize(result: &TestResult) -> String {
    match &result.error {
        Some(error) if !result.has_results() => error.clone(),
        _ => format!(
            "{} passed, {} failed, {} skipped in {:.2}s",
            result.passed, result.failed, result.skipped, result.duration
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::{ServiceTestConfig, TestTypeConfig};
    use runners::{CommandOutput, RunnerResult};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers every command with passing Go output and records command lines.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
        fail_program: Option<&'static str>,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(&self, command: &CommandLine, _dir: &Path) -> RunnerResult<CommandOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            if self.fail_program == Some(command.program.as_str()) {
                return Ok(CommandOutput {
                    status: Some(1),
                    output: "boom".to_string(),
                });
            }
            Ok(CommandOutput {
                status: Some(0),
                output: "--- PASS: TestAdd (0.01s)\nok  \tcalc\t0.02s\n".to_string(),
            })
        }
    }

    fn go_service(name: &str, dir: &Path, unit: TestTypeConfig) -> ServiceInfo {
        let mut config = ServiceTestConfig::with_framework("gotest");
        config.unit = Some(unit);
        ServiceInfo::new(name, "go", dir).with_config(config)
    }

    #[test]
    fn test_select_by_exact_name() {
        let orchestrator = TestOrchestrator::new(TestConfig::default()).with_services(vec![
            ServiceInfo::new("api", "go", "/a"),
            ServiceInfo::new("api-gateway", "go", "/b"),
        ]);

        let names = |filter: &[&str]| -> Vec<String> {
            let filter: Vec<String> = filter.iter().map(|s| s.to_string()).collect();
            orchestrator
                .select(&filter)
                .unwrap()
                .into_iter()
                .map(|s| s.name.clone())
                .collect()
        };
        assert_eq!(names(&[]), vec!["api", "api-gateway"]);
        assert_eq!(names(&["api"]), vec!["api"]);
        assert!(matches!(
            orchestrator.select(&["web".to_string()]),
            Err(OrchestratorError::NoServices)
        ));
        assert_eq!(
            orchestrator.service_paths(),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[tokio::test]
    async fn test_setup_and_teardown_surround_tests() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let service = go_service(
            "calc",
            dir.path(),
            TestTypeConfig {
                setup: vec!["docker compose up -d".to_string()],
                teardown: vec!["docker compose down".to_string()],
                ..Default::default()
            },
        );
        let orchestrator = TestOrchestrator::new(TestConfig::default())
            .with_services(vec![service])
            .with_executor(executor.clone());

        let result = orchestrator.execute_tests(TestType::Unit, &[]).await.unwrap();
        assert!(result.success);

        let calls = executor.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "docker compose up -d");
        assert!(calls[1].starts_with("go test -v -run"));
        assert_eq!(calls[2], "docker compose down");
    }

    #[tokio::test]
    async fn test_setup_failure_aborts_service_but_runs_nothing_else() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor {
            fail_program: Some("make"),
            ..Default::default()
        });
        let service = go_service(
            "calc",
            dir.path(),
            TestTypeConfig {
                setup: vec!["make fixtures".to_string()],
                ..Default::default()
            },
        );
        let orchestrator = TestOrchestrator::new(TestConfig::default())
            .with_services(vec![service])
            .with_executor(executor.clone());

        let result = orchestrator.execute_tests(TestType::Unit, &[]).await.unwrap();
        assert!(!result.success);
        let error = result.services[0].error.as_deref().unwrap();
        assert!(error.starts_with("setup failed: `make fixtures`"), "{error}");
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_is_not_escalated() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor {
            fail_program: Some("cleanup"),
            ..Default::default()
        });
        let service = go_service(
            "calc",
            dir.path(),
            TestTypeConfig {
                teardown: vec!["cleanup --all".to_string()],
                ..Default::default()
            },
        );
        let orchestrator = TestOrchestrator::new(TestConfig::default())
            .with_services(vec![service])
            .with_executor(executor);

        let result = orchestrator.execute_tests(TestType::Unit, &[]).await.unwrap();
        assert!(result.success);
        assert_eq!(result.passed, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_running() {
        let orchestrator = TestOrchestrator::new(TestConfig::new().with_coverage_threshold(150.0))
            .with_services(vec![ServiceInfo::new("api", "go", "/a")]);
        assert!(matches!(
            orchestrator.execute_tests(TestType::All, &[]).await,
            Err(OrchestratorError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_summarize() {
        let mut result = TestResult::new(TestType::Unit);
        result.passed = 3;
        result.total = 3;
        result.duration = 1.5;
        assert_eq!(summarize(&result), "3 passed, 0 failed, 0 skipped in 1.50s");

        let failure = TestResult::execution_failure("api", TestType::Unit, "command not found");
        assert_eq!(summarize(&failure), "command not found");
    }
}
