//! Command execution module.
//!
//! Hands resolved command lines to the platform shell.

use std::path::PathBuf;
use std::process::{Command as ProcessCommand, Stdio};
use std::time::{Duration, Instant};

use super::error::Result;

/// Result of executing a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code (None if terminated by a signal)
    pub code: Option<i32>,

    /// Standard output (if captured)
    pub stdout: Option<String>,

    /// Standard error (if captured)
    pub stderr: Option<String>,

    /// Time taken to execute
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something that can run a resolved command line.
pub trait CommandExecutor {
    /// Run `command_line` and report how it ended.
    fn execute(&self, command_line: &str) -> Result<ExecutionResult>;
}

/// Executor that runs command lines through the system shell.
#[derive(Debug, Default, Clone)]
pub struct ShellExecutor {
    /// Whether to capture output (vs pass through to terminal)
    pub capture_output: bool,

    /// Shell override (defaults to `sh` / `cmd`)
    pub shell: Option<String>,

    /// Working directory for every command
    pub working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to capture output.
    #[must_use]
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Override the shell.
    #[must_use]
    pub fn with_shell(mut self, shell: Option<String>) -> Self {
        self.shell = shell;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl CommandExecutor for ShellExecutor {
    fn execute(&self, command_line: &str) -> Result<ExecutionResult> {
        let start = Instant::now();

        let (default_shell, shell_arg) = get_shell();
        let shell = self.shell.as_deref().unwrap_or(default_shell);

        let mut cmd = ProcessCommand::new(shell);
        cmd.arg(shell_arg);
        cmd.arg(command_line);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if self.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
            cmd.stdin(Stdio::inherit());
        }

        tracing::debug!(shell, command = command_line, "Spawning command");
        let output = cmd.output()?;

        let (stdout, stderr) = if self.capture_output {
            (
                Some(String::from_utf8_lossy(&output.stdout).to_string()),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            )
        } else {
            (None, None)
        };

        Ok(ExecutionResult { code: output.status.code(), stdout, stderr, duration: start.elapsed() })
    }
}

/// Get the shell and argument for the current platform.
fn get_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}
