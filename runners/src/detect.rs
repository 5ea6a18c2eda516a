//! Framework, package manager and test-type detection from project files.
//!
//! Everything here is a cheap filesystem probe. Results only ever fill gaps in
//! a service's configuration; see [`resolve_test_config`].

use crate::{RunnerError, RunnerResult};
use model::{Language, ServiceInfo, ServiceTestConfig, TestType, TestTypeConfig};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into while scanning a project.
pub const SKIP_DIRS: &[&str] = &["node_modules", "vendor", ".git", "bin", "obj", "__pycache__"];

pub(crate) fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

/// Regular files below `dir`, skipping [`SKIP_DIRS`].
pub fn project_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
}

fn read_lossy(path: &Path) -> Option<String> {
    fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub fn detect_node_framework(dir: &Path) -> String {
    const CONFIG_FILES: &[(&str, &str)] = &[
        ("jest.config.js", "jest"),
        ("jest.config.ts", "jest"),
        ("jest.config.json", "jest"),
        ("vitest.config.js", "vitest"),
        ("vitest.config.ts", "vitest"),
        (".mocharc.js", "mocha"),
        (".mocharc.json", "mocha"),
        (".mocharc.yaml", "mocha"),
    ];

    for (file, framework) in CONFIG_FILES {
        if dir.join(file).exists() {
            return framework.to_string();
        }
    }

    if let Some(content) = read_lossy(&dir.join("package.json")) {
        for framework in ["jest", "vitest", "mocha"] {
            if content.contains(&format!("\"{}\"", framework)) {
                return framework.to_string();
            }
        }
    }

    "npm".to_string()
}

/// pytest runs unittest-style suites as well, so it is always the detected choice.
/// `unittest` is only used when configured explicitly.
pub fn detect_python_framework(_dir: &Path) -> String {
    "pytest".to_string()
}

pub fn detect_go_framework(dir: &Path) -> RunnerResult<String> {
    if !dir.join("go.mod").exists() {
        return Err(RunnerError::DetectionFailed {
            reason: format!("go.mod not found in {}", dir.display()),
        });
    }
    Ok("gotest".to_string())
}

pub fn detect_dotnet_framework(dir: &Path) -> String {
    for project in find_dotnet_test_projects(dir) {
        let Some(content) = read_lossy(&project) else {
            continue;
        };
        if content.contains("xunit") {
            return "xunit".to_string();
        }
        if content.contains("NUnit") {
            return "nunit".to_string();
        }
        if content.contains("MSTest") {
            return "mstest".to_string();
        }
    }
    "xunit".to_string()
}

pub fn detect_framework(language: Language, dir: &Path) -> RunnerResult<String> {
    Ok(match language {
        Language::Node => detect_node_framework(dir),
        Language::Python => detect_python_framework(dir),
        Language::Go => detect_go_framework(dir)?,
        Language::Dotnet => detect_dotnet_framework(dir),
    })
}

pub fn detect_node_package_manager(dir: &Path) -> &'static str {
    if dir.join("pnpm-lock.yaml").exists() {
        "pnpm"
    } else if dir.join("yarn.lock").exists() {
        "yarn"
    } else if dir.join("bun.lockb").exists() {
        "bun"
    } else {
        "npm"
    }
}

pub fn detect_python_package_manager(dir: &Path) -> &'static str {
    if dir.join("uv.lock").exists() {
        return "uv";
    }
    if dir.join("poetry.lock").exists() {
        return "poetry";
    }
    match read_pyproject(dir) {
        Some(pyproject) if has_tool_table(&pyproject, "uv") => "uv",
        Some(pyproject) if has_tool_table(&pyproject, "poetry") => "poetry",
        _ => "pip",
    }
}

/// Parsed `pyproject.toml`, if present and well-formed.
pub fn read_pyproject(dir: &Path) -> Option<toml::Table> {
    read_lossy(&dir.join("pyproject.toml")).and_then(|content| content.parse().ok())
}

/// Whether `[tool.<name>]` (or any nested `[tool.<name>.*]`) is declared.
pub fn has_tool_table(pyproject: &toml::Table, name: &str) -> bool {
    pyproject
        .get("tool")
        .and_then(|tool| tool.get(name))
        .is_some()
}

/// `.csproj`/`.fsproj` files whose name contains "test", sorted by path.
pub fn find_dotnet_test_projects(dir: &Path) -> Vec<PathBuf> {
    let mut projects: Vec<PathBuf> = project_files(dir)
        .filter(|path| {
            let is_project = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "csproj" || e == "fsproj");
            let named_test = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.to_lowercase().contains("test"));
            is_project && named_test
        })
        .collect();
    projects.sort();
    projects
}

/// Directories that appear to hold each kind of test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedTestTypes {
    pub unit: Vec<PathBuf>,
    pub integration: Vec<PathBuf>,
    pub e2e: Vec<PathBuf>,
}

impl DetectedTestTypes {
    pub fn paths(&self, test_type: TestType) -> &[PathBuf] {
        match test_type {
            TestType::Unit => &self.unit,
            TestType::Integration => &self.integration,
            TestType::E2e => &self.e2e,
            TestType::All => &[],
        }
    }

    /// Detected types, or just `All` when nothing specific was found.
    pub fn available(&self) -> Vec<TestType> {
        let types: Vec<TestType> = [TestType::Unit, TestType::Integration, TestType::E2e]
            .into_iter()
            .filter(|t| !self.paths(*t).is_empty())
            .collect();
        if types.is_empty() {
            vec![TestType::All]
        } else {
            types
        }
    }

    fn record(&mut self, test_type: TestType, path: PathBuf) {
        let slot = match test_type {
            TestType::Unit => &mut self.unit,
            TestType::Integration => &mut self.integration,
            TestType::E2e => &mut self.e2e,
            TestType::All => return,
        };
        if !slot.contains(&path) {
            slot.push(path);
        }
    }
}

const TYPED_DIRS: &[(TestType, &[&str])] = &[
    (
        TestType::Unit,
        &[
            "unit",
            "tests/unit",
            "test/unit",
            "__tests__/unit",
            "src/__tests__/unit",
            "spec/unit",
            "UnitTests",
        ],
    ),
    (
        TestType::Integration,
        &[
            "integration",
            "tests/integration",
            "test/integration",
            "__tests__/integration",
            "spec/integration",
            "IntegrationTests",
        ],
    ),
    (
        TestType::E2e,
        &[
            "e2e",
            "tests/e2e",
            "test/e2e",
            "__tests__/e2e",
            "spec/e2e",
            "EndToEnd",
            "end-to-end",
            "cypress",
            "playwright",
        ],
    ),
];

struct TypedPatterns {
    unit: Regex,
    integration: Regex,
    e2e: Regex,
}

fn typed_patterns(unit: &str, integration: &str, e2e: &str) -> TypedPatterns {
    TypedPatterns {
        unit: Regex::new(unit).expect("unit file pattern is valid"),
        integration: Regex::new(integration).expect("integration file pattern is valid"),
        e2e: Regex::new(e2e).expect("e2e file pattern is valid"),
    }
}

static NODE_PATTERNS: LazyLock<TypedPatterns> = LazyLock::new(|| {
    typed_patterns(
        r"[._]?unit[._](test|spec)\.(ts|tsx|js|jsx)$",
        r"[._]?integration[._](test|spec)\.(ts|tsx|js|jsx)$",
        r"([._]?e2e[._](test|spec)|\.cy)\.(ts|tsx|js|jsx)$",
    )
});

static PYTHON_PATTERNS: LazyLock<TypedPatterns> = LazyLock::new(|| {
    typed_patterns(
        r"(^test_unit.*|^unit_test.*|_unit_test|^test_.*_unit)\.py$",
        r"(^test_integration.*|^integration_test.*|_integration_test|^test_.*_integration)\.py$",
        r"(^test_e2e.*|^e2e_test.*|_e2e_test|^test_.*_e2e)\.py$",
    )
});

static GO_PATTERNS: LazyLock<TypedPatterns> = LazyLock::new(|| {
    typed_patterns(
        r"unit_test\.go$",
        r"integration_test\.go$",
        r"e2e_test\.go$",
    )
});

static DOTNET_PATTERNS: LazyLock<TypedPatterns> = LazyLock::new(|| {
    typed_patterns(
        r"(unittests?|\.unit)\.cs$",
        r"(integrationtests?|\.integration)\.cs$",
        r"(e2etests?|\.e2e)\.cs$",
    )
});

fn patterns_for(language: Language) -> &'static TypedPatterns {
    match language {
        Language::Node => &NODE_PATTERNS,
        Language::Python => &PYTHON_PATTERNS,
        Language::Go => &GO_PATTERNS,
        Language::Dotnet => &DOTNET_PATTERNS,
    }
}

/// Find unit/integration/e2e tests by conventional directory names and file names.
pub fn detect_test_types(dir: &Path, language: Language) -> DetectedTestTypes {
    let mut detected = DetectedTestTypes::default();

    for (test_type, names) in TYPED_DIRS {
        for name in *names {
            let path = dir.join(name);
            if path.is_dir() {
                detected.record(*test_type, path);
            }
        }
    }

    let patterns = patterns_for(language);
    for path in project_files(dir) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let name = name.to_lowercase();
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        if patterns.unit.is_match(&name) {
            detected.record(TestType::Unit, parent.clone());
        }
        if patterns.integration.is_match(&name) {
            detected.record(TestType::Integration, parent.clone());
        }
        if patterns.e2e.is_match(&name) {
            detected.record(TestType::E2e, parent);
        }
    }

    detected
}

fn suggested_type_config(language: Language, test_type: TestType) -> TestTypeConfig {
    let name = test_type.as_str();
    match language {
        Language::Node => TestTypeConfig::with_pattern(name),
        Language::Python => TestTypeConfig::with_markers(vec![name.to_string()]),
        Language::Go => TestTypeConfig::with_pattern(match test_type {
            TestType::Unit => "^TestUnit",
            TestType::Integration => "^TestIntegration",
            _ => "^TestE2E",
        }),
        Language::Dotnet => TestTypeConfig::with_filter(match test_type {
            TestType::Unit => "Category=Unit",
            TestType::Integration => "Category=Integration",
            _ => "Category=E2E",
        }),
    }
}

/// Per-type settings suggested by the test types found on disk.
pub fn suggest_test_config(dir: &Path, language: Language) -> ServiceTestConfig {
    let detected = detect_test_types(dir, language);
    let suggest = |t: TestType| {
        (!detected.paths(t).is_empty()).then(|| suggested_type_config(language, t))
    };
    ServiceTestConfig {
        unit: suggest(TestType::Unit),
        integration: suggest(TestType::Integration),
        e2e: suggest(TestType::E2e),
        ..Default::default()
    }
}

/// Effective configuration for a service.
///
/// A service carrying an explicit configuration gets it back unchanged.
/// Otherwise the framework is detected and per-type settings are suggested
/// from the project layout.
pub fn resolve_test_config(service: &ServiceInfo) -> RunnerResult<ServiceTestConfig> {
    if let Some(config) = &service.config {
        return Ok(config.clone());
    }

    let language =
        service
            .language_kind()
            .ok_or_else(|| RunnerError::UnsupportedLanguage {
                language: service.language.clone(),
            })?;

    let mut config = ServiceTestConfig::with_framework(detect_framework(language, &service.dir)?);
    config.fill_missing_from(suggest_test_config(&service.dir, language));
    debug!(
        service = %service.name,
        framework = %config.framework,
        "detected test configuration"
    );
    Ok(config)
}
