//! Process execution behind a trait so runners can be exercised with canned output.

use crate::command::CommandLine;
use crate::{RunnerError, RunnerResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Captured result of one external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub status: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` in `dir` and capture its combined output.
    ///
    /// A non-zero exit is not an error here; only failing to start or wait on
    /// the process is.
    async fn execute(&self, command: &CommandLine, dir: &Path) -> RunnerResult<CommandOutput>;
}

/// How child output is mirrored to the terminal while it is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Echo {
    #[default]
    Silent,
    /// Forward lines unchanged
    Plain,
    /// Forward lines as `[label] line`
    Prefixed,
}

/// Runs commands as real child processes through tokio.
///
/// Children are spawned with `kill_on_drop`, so dropping the returned future
/// (for instance when a timeout elapses) terminates the process.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    echo: Echo,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo(mut self, echo: Echo) -> Self {
        self.echo = echo;
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &CommandLine, dir: &Path) -> RunnerResult<CommandOutput> {
        debug!(command = %command, dir = %dir.display(), "spawning process");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::ExecutionFailed {
                reason: format!("failed to start `{}`: {}", command, e),
            })?;

        let label = command.label.as_deref();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out, err, status) = tokio::join!(
            capture(stdout, self.echo, label),
            capture(stderr, self.echo, label),
            child.wait()
        );
        let status = status?;

        let mut output = out?;
        let err = err?;
        if !err.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err);
        }

        debug!(command = %command, status = ?status.code(), "process exited");
        Ok(CommandOutput {
            status: status.code(),
            output,
        })
    }
}

async fn capture<R>(reader: Option<R>, echo: Echo, label: Option<&str>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };

    if echo == Echo::Silent {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        return Ok(String::from_utf8_lossy(&buf).into_owned());
    }

    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        match (echo, label) {
            (Echo::Prefixed, Some(label)) => println!("[{}] {}", label, line),
            _ => println!("{}", line),
        }
        captured.push_str(line);
        captured.push('\n');
    }
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_process_executor_captures_both_streams() {
        let dir = TempDir::new().unwrap();
        let command = CommandLine::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);

        let output = ProcessExecutor::new()
            .execute(&command, dir.path())
            .await
            .unwrap();

        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert!(output.output.contains("out"));
        assert!(output.output.contains("err"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_invalid_utf8_output_is_captured_in_every_echo_mode() {
        let dir = TempDir::new().unwrap();
        let command = CommandLine::new("sh")
            .args(["-c", r"printf 'caf\351\n--- PASS: TestA (0.00s)\n'"])
            .with_label("api");

        for echo in [Echo::Silent, Echo::Plain, Echo::Prefixed] {
            let output = ProcessExecutor::new()
                .with_echo(echo)
                .execute(&command, dir.path())
                .await
                .unwrap();

            assert!(output.success(), "{echo:?}");
            assert!(output.output.starts_with("caf\u{FFFD}\n"), "{echo:?}");
            assert!(output.output.contains("--- PASS: TestA (0.00s)"), "{echo:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let command = CommandLine::new("polytest-definitely-not-a-real-binary");

        let err = ProcessExecutor::new()
            .execute(&command, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_dropping_future_kills_child() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 2; touch {}", marker.display());
        let command = CommandLine::new("sh").args(["-c", script.as_str()]);
        let executor = ProcessExecutor::new();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            executor.execute(&command, dir.path()),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }
}
