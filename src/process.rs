//! Centralized command execution with consistent error handling.
//!
//! Every external tool the pipeline drives (git, patch, make) is described
//! by a [`Cmd`] and executed through a [`Runner`]. The runner only executes;
//! [`Cmd::run_with`] turns a non-zero exit into a [`CommandFailed`] error so
//! that the exit code survives up to `main`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` if terminated by signal.
    pub code: Option<i32>,
    /// Captured stdout (empty for interactive commands).
    pub stdout: String,
    /// Captured stderr (empty for interactive commands).
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with no output.
    pub fn ok() -> Self {
        Self::exit(0)
    }

    /// A result with the given exit code and no output.
    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// An external command exited with a non-zero status.
#[derive(Debug, thiserror::Error)]
#[error("{prefix} (exit code {code}){detail}")]
pub struct CommandFailed {
    pub prefix: String,
    pub code: i32,
    detail: String,
}

impl CommandFailed {
    fn new(prefix: String, code: i32, stderr: &str) -> Self {
        let detail = if stderr.is_empty() {
            String::new()
        } else {
            format!(":\n{}", stderr)
        };
        Self {
            prefix,
            code,
            detail,
        }
    }
}

/// Executes commands. The seam between the pipeline and the host.
pub trait Runner {
    /// Run `cmd` to completion. A non-zero exit is not an error here.
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult>;
}

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct System;

impl Runner for System {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(ref dir) = cmd.current_dir {
            command.current_dir(dir);
        }

        if cmd.interactive {
            // Output goes straight to the terminal so long builds show progress.
            command.stdin(Stdio::inherit());
            command.stdout(Stdio::inherit());
            command.stderr(Stdio::inherit());
            let status = command.status().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", cmd.program)
            })?;
            return Ok(CommandResult {
                code: status.code(),
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let output = command.output().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", cmd.program)
        })?;

        Ok(CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Inherit stdio instead of capturing.
    interactive: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            interactive: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Stream output to the terminal instead of capturing it.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// True if any argument equals `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Program and arguments joined by spaces, for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run through `runner`, failing with [`CommandFailed`] on non-zero exit
    /// unless [`Cmd::allow_fail`] was set.
    pub fn run_with(&self, runner: &dyn Runner) -> Result<CommandResult> {
        tracing::debug!(cmd = %self.display(), "exec");
        let result = runner.execute(self)?;

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .clone()
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            return Err(CommandFailed::new(prefix, result.code(), result.stderr_trimmed()).into());
        }

        Ok(result)
    }
}

/// Check if a program exists in PATH.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

// =============================================================================
// Test support
// =============================================================================


// =============================================================================
// Tests
// =============================================================================
