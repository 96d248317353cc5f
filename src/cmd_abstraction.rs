//! External command execution behind a mockable trait.
//!
//! Firewall backends and the program monitor never spawn processes directly;
//! they go through [`CommandExecutor`] so tests can script the host tools.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Captured result of one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status was 0
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout, mostly for tests.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }

    /// Failed output with the given text on stdout (netsh reports errors there).
    pub fn failed(stdout: impl Into<String>, code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: false,
            code: Some(code),
        }
    }

    /// stdout and stderr joined, trimmed.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (false, true) => out.to_string(),
            (false, false) => format!("{} {}", out, err),
        }
    }
}

#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd` with `args` and capture its output.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run `cmd` with `args`, feeding `stdin` to the child.
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Shared handle to an executor, as held by backends.
pub type SharedExecutor = Arc<dyn CommandExecutor>;

/// Runs real system commands.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> SharedExecutor {
        Arc::new(Self)
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = hidden(Command::new(cmd))
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to execute {}", cmd))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = hidden(Command::new(cmd))
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", cmd))?;

        // The pipe closes when `stdin` drops, before the child is reaped
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(stdin_data.as_bytes()),
            None => Ok(()),
        };

        let output = child.wait_with_output()?;
        written.with_context(|| {
            format!(
                "Failed to write stdin of {}: {}",
                cmd,
                String::from_utf8_lossy(&output.stderr).trim()
            )
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Keep console windows from flashing up for every netsh call.
#[cfg(windows)]
fn hidden(mut cmd: Command) -> Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(windows))]
fn hidden(cmd: Command) -> Command {
    cmd
}

/// Run a command and fail unless it exits successfully.
///
/// The error message carries the tool's own output, which is what the
/// controller ends up showing to the user.
pub fn run_checked(executor: &dyn CommandExecutor, cmd: &str, args: &[String]) -> Result<String> {
    let output = executor.execute(cmd, args)?;
    if output.success {
        Ok(output.stdout)
    } else {
        anyhow::bail!(
            "{} exited with {}: {}",
            cmd,
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.combined()
        )
    }
}

/// `&[&str]` to owned args; mockall cannot express `&[&str]` lifetimes.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
