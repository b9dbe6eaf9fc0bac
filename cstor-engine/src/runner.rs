//! Command execution seam.
//!
//! Every interaction with `zpool`, `zfs`, `touch` and `truncate` goes through
//! [`CommandRunner`]. Production code uses [`HostRunner`]; tests use
//! [`crate::mock::ScriptedRunner`] so that nothing forks.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{EngineError, Result};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Convert a non-zero exit into [`EngineError::ToolFailure`].
    pub fn into_result(self, command: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(EngineError::ToolFailure {
                command: command.to_string(),
                code: self.code,
                output: self.combined().trim().to_string(),
            })
        }
    }
}

/// Render an argv the way it would be typed, for logs and errors.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs a program with arguments and captures its output.
///
/// A non-zero exit is not an error at this layer; callers classify it.
/// Only a failure to start the program is returned as `Err`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct HostRunner;

impl HostRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = display_command(program, args);
        debug!(command = %line, "Running command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                command: line.clone(),
                source: e,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            error!(
                command = %line,
                code = ?result.code,
                output = %result.combined().trim(),
                "Command failed"
            );
        }

        Ok(result)
    }
}
