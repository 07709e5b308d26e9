//! External command execution.
//!
//! Every leaf collaborator and probe that shells out goes through
//! [`CommandExecutor`], so tests can swap in
//! [`ScriptedExecutor`](crate::fakes::ScriptedExecutor).

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{LabError, Result};

/// A command to run: program, arguments, working directory, and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Build a spec from an argv-style list. The first element is the program.
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = argv.into_iter().map(Into::into);
        let program = iter.next().unwrap_or_default();
        Self {
            program,
            args: iter.collect(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Full argv (program followed by arguments).
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, or `fallback` when stderr is empty.
    pub fn error_message(&self, fallback: &str) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            fallback.to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// The single seam for running external processes.
///
/// Implementations return `Err` only when the process could not be run to
/// completion (missing binary, spawn failure, timeout). A non-zero exit is a
/// successful run with a failing [`CommandOutput`].
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if spec.program.is_empty() {
            return Err(LabError::tool("<empty>", "empty command"));
        }

        debug!(command = %spec, "Running external command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LabError::tool(&spec.program, "not installed or not in PATH")
            } else {
                LabError::tool(&spec.program, e.to_string())
            }
        })?;

        let output = match spec.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| {
                    LabError::tool(
                        &spec.program,
                        format!("timed out after {} seconds", timeout.as_secs()),
                    )
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| LabError::tool(&spec.program, e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_from_argv() {
        let spec = CommandSpec::from_argv(["docker", "compose", "ps"]);
        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args, vec!["compose", "ps"]);
        assert_eq!(spec.to_string(), "docker compose ps");
    }

    #[test]
    fn test_error_message_fallback() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "  \n".to_string(),
        };
        assert_eq!(out.error_message("sysctl command failed"), "sysctl command failed");

        let out = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "permission denied\n".to_string(),
        };
        assert_eq!(out.error_message("ignored"), "permission denied");
    }

    #[tokio::test]
    async fn test_process_executor_captures_stdout() {
        let out = ProcessExecutor::new()
            .run(&CommandSpec::new("echo").arg("hello"))
            .await
            .expect("echo should run");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_process_executor_reports_exit_code() {
        let out = ProcessExecutor::new()
            .run(&CommandSpec::new("false"))
            .await
            .expect("false should run");
        assert!(!out.success());
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test]
    async fn test_process_executor_missing_binary() {
        let err = ProcessExecutor::new()
            .run(&CommandSpec::new("definitely-not-a-real-binary-aptl"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }

    #[tokio::test]
    async fn test_process_executor_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(50));
        let err = ProcessExecutor::new().run(&spec).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
