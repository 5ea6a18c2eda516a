//! Pre-flight check of whether each service can be tested at all.

use glob::{MatchOptions, Pattern};
use model::{Language, ServiceInfo};
use runners::detect::{has_tool_table, project_files, read_pyproject, resolve_test_config};
use runners::{create_runner, CommandExecutor, ProcessExecutor};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Testability verdict for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceValidation {
    pub name: String,
    pub language: String,
    pub framework: String,
    /// Test files, or test projects for .NET
    pub test_files: usize,
    pub can_test: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ServiceValidation {
    fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.can_test = false;
        self.skip_reason = Some(reason.into());
        self
    }
}

pub fn validate_service(service: &ServiceInfo) -> ServiceValidation {
    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new());
    validate_service_with(service, executor)
}

/// Validate with a specific executor. Nothing is executed; the executor only
/// completes the runner used for the `has_tests` probe.
pub fn validate_service_with(
    service: &ServiceInfo,
    executor: Arc<dyn CommandExecutor>,
) -> ServiceValidation {
    let validation = ServiceValidation {
        name: service.name.clone(),
        language: service.language.clone(),
        ..Default::default()
    };

    if !service.dir.is_dir() {
        return validation.skipped("Service directory does not exist");
    }
    let Some(language) = service.language_kind() else {
        return validation.skipped(format!("Unsupported language: {}", service.language));
    };

    let config = match resolve_test_config(service) {
        Ok(config) => config,
        Err(e) => return validation.skipped(e.to_string()),
    };
    let mut validation = ServiceValidation {
        framework: config.framework.clone(),
        test_files: count_test_files(&service.dir, language),
        ..validation
    };

    let runner = match create_runner(service, config, executor) {
        Ok(runner) => runner,
        Err(e) => return validation.skipped(e.to_string()),
    };

    validation.can_test = runner.has_tests()
        || validation.test_files > 0
        || (language == Language::Python && has_pytest_config(&service.dir));
    if !validation.can_test {
        validation = validation.skipped(no_tests_reason(language));
    }

    debug!(
        service = %validation.name,
        framework = %validation.framework,
        test_files = validation.test_files,
        can_test = validation.can_test,
        "validated service"
    );
    validation
}

pub fn validate_services(services: &[ServiceInfo]) -> Vec<ServiceValidation> {
    services.iter().map(validate_service).collect()
}

fn no_tests_reason(language: Language) -> &'static str {
    match language {
        Language::Node => "No test script in package.json and no test files found",
        Language::Python => "No pytest configuration and no test files found",
        Language::Go => "No *_test.go files found",
        Language::Dotnet => "No test projects found (projects with 'Test' in name)",
    }
}

fn test_file_patterns(language: Language) -> &'static [&'static str] {
    match language {
        Language::Node => &[
            "*.test.js", "*.test.ts", "*.test.jsx", "*.test.tsx",
            "*.spec.js", "*.spec.ts", "*.spec.jsx", "*.spec.tsx",
        ],
        Language::Python => &["test_*.py", "*_test.py", "tests/**/*.py", "test/**/*.py"],
        Language::Go => &["*_test.go"],
        Language::Dotnet => &["*test*.csproj", "*test*.fsproj"],
    }
}

/// Count files whose name, or path relative to `dir`, matches a language pattern.
pub fn count_test_files(dir: &Path, language: Language) -> usize {
    let patterns: Vec<Pattern> = test_file_patterns(language)
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();
    let options = MatchOptions {
        case_sensitive: language != Language::Dotnet,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    project_files(dir)
        .filter(|path| {
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let name = Path::new(relative.file_name().unwrap_or_default());
            patterns.iter().any(|p| {
                p.matches_path_with(name, options) || p.matches_path_with(relative, options)
            })
        })
        .count()
}

fn has_pytest_config(dir: &Path) -> bool {
    ["pytest.ini", "setup.cfg", "tox.ini"]
        .iter()
        .any(|f| dir.join(f).is_file())
        || read_pyproject(dir).is_some_and(|p| has_tool_table(&p, "pytest"))
}
