#![allow(dead_code)]

use async_trait::async_trait;
use model::{ServiceInfo, ServiceTestConfig};
use runners::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const GO_PASS: &str = "--- PASS: TestAdd (0.01s)\nok  \texample.com/calc\t0.02s\n";
pub const GO_FAIL: &str = "\
=== RUN   TestAdd
--- PASS: TestAdd (0.01s)
=== RUN   TestDivide
    calc_test.go:14: expected 2, got 3
--- FAIL: TestDivide (0.02s)
FAIL\texample.com/calc\t0.03s
";
pub const CRASH: &str = "go: cannot find main module\n";

#[derive(Clone)]
pub struct Script {
    pub status: i32,
    pub output: &'static str,
    pub delay: Duration,
}

impl Script {
    pub fn pass() -> Self {
        Self::new(0, GO_PASS)
    }

    pub fn new(status: i32, output: &'static str) -> Self {
        Self {
            status,
            output,
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Answers `go` invocations per service label; every other program succeeds
/// silently. All calls are recorded as `label: command`.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, service: &str, script: Script) -> Self {
        self.scripts.insert(service.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran_tests_for(&self, service: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| c.starts_with(&format!("{service}: go test")))
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &CommandLine, _dir: &Path) -> RunnerResult<CommandOutput> {
        let label = command.label.clone().unwrap_or_default();
        self.calls.lock().unwrap().push(format!("{label}: {command}"));

        if command.program != "go" {
            return Ok(CommandOutput {
                status: Some(0),
                output: String::new(),
            });
        }
        let script = self.scripts.get(&label).cloned().unwrap_or_else(Script::pass);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        Ok(CommandOutput {
            status: Some(script.status),
            output: script.output.to_string(),
        })
    }
}

/// A Go module with one test file under `root/name`.
pub fn go_project(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("go.mod"), format!("module example.com/{name}\n")).unwrap();
    fs::write(dir.join("calc_test.go"), "package calc\n").unwrap();
    dir
}

pub fn go_service(root: &Path, name: &str) -> ServiceInfo {
    ServiceInfo::new(name, "go", go_project(root, name))
        .with_config(ServiceTestConfig::with_framework("gotest"))
}
