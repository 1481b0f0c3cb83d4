//! External command execution
//!
//! Runs one child process per command line and returns its captured output
//! once the process has exited. Both output streams are drained concurrently
//! with the wait so a chatty child can never block on a full pipe.
//!
//! There is no timeout: a hung command blocks the caller until it exits.

use crate::config::{OutputCapture, ShellConfig};
use crate::types::CommandResult;
use crate::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

static UID_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^uid=(\d+)").expect("uid pattern is a valid regex"));

/// Runs command lines on behalf of the mesh controller
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command line directly
    async fn execute(&self, command_line: &str) -> Result<CommandResult>;

    /// Run a command line through a shell confirmed to have root identity
    async fn execute_elevated(&self, command_line: &str) -> Result<CommandResult>;
}

/// Process-backed command runner
pub struct ShellExecutor {
    config: ShellConfig,
    /// Elevation binary confirmed to run as root, found on first use
    elevation: OnceCell<String>,
}

impl ShellExecutor {
    /// Create a new executor
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            elevation: OnceCell::new(),
        }
    }

    /// The cached elevation binary, if one has been confirmed
    pub fn elevation_binary(&self) -> Option<&str> {
        self.elevation.get().map(String::as_str)
    }

    async fn native_exec(&self, command_line: &str) -> Result<CommandResult> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Command("empty command line".to_string()))?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Command(format!("Failed to spawn `{}`: {}", command_line, e)))?;

        collect(child, command_line, self.config.capture).await
    }

    async fn su_exec(
        &self,
        shell: &str,
        command_line: &str,
        capture: OutputCapture,
    ) -> Result<CommandResult> {
        let mut child = Command::new(shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Command(format!("Failed to spawn `{}`: {}", shell, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let script = format!("{}\nexit\n", command_line);
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| Error::Command(format!("Failed to write to `{}`: {}", shell, e)))?;
            stdin
                .flush()
                .await
                .map_err(|e| Error::Command(format!("Failed to write to `{}`: {}", shell, e)))?;
        }

        collect(child, command_line, capture).await
    }

    /// Find the first elevation candidate whose identity probe reports uid 0
    async fn find_root_shell(&self) -> Result<String> {
        for shell in &self.config.su_candidates {
            if self.is_root_shell(shell).await {
                info!("Using elevation binary: {}", shell);
                return Ok(shell.clone());
            }
        }

        warn!(
            "No elevation binary confirmed root among {:?}",
            self.config.su_candidates
        );
        Err(Error::PrivilegeUnavailable)
    }

    async fn is_root_shell(&self, shell: &str) -> bool {
        for id in &self.config.id_candidates {
            match self.su_exec(shell, id, OutputCapture::Both).await {
                Ok(output) => {
                    if parse_uid(&output.stdout) == Some(0) {
                        return true;
                    }
                }
                Err(e) => {
                    debug!("Elevation candidate {} unusable: {}", shell, e);
                    return false;
                }
            }
        }
        false
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn execute(&self, command_line: &str) -> Result<CommandResult> {
        let output = self.native_exec(command_line).await?;
        log_output(command_line, &output);
        Ok(output)
    }

    async fn execute_elevated(&self, command_line: &str) -> Result<CommandResult> {
        let shell = self
            .elevation
            .get_or_try_init(|| self.find_root_shell())
            .await?;

        let output = self.su_exec(shell, command_line, self.config.capture).await?;
        log_output(command_line, &output);
        Ok(output)
    }
}

/// Wait for the child while draining both of its output streams
async fn collect(mut child: Child, command_line: &str, capture: OutputCapture) -> Result<CommandResult> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(drain(stdout), drain(stderr), child.wait());

    let status = status
        .map_err(|e| Error::Command(format!("Failed waiting for `{}`: {}", command_line, e)))?;

    Ok(CommandResult {
        stdout: if capture.keeps_stdout() { stdout } else { String::new() },
        stderr: if capture.keeps_stderr() { stderr } else { String::new() },
        exit_code: status.code().unwrap_or(-1),
    })
}

/// Read a stream to its end, keeping whatever arrived before a read error
async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        warn!("Failed reading command output: {}", e);
    }
    normalize(&String::from_utf8_lossy(&buf))
}

/// Join lines with `\n` and drop the trailing line terminator
fn normalize(raw: &str) -> String {
    raw.lines().collect::<Vec<_>>().join("\n")
}

/// Extract the numeric uid from `id` output
fn parse_uid(stdout: &str) -> Option<u32> {
    UID_LINE
        .captures(stdout.trim_start())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn log_output(command_line: &str, output: &CommandResult) {
    debug!("CMD ({}): {}", output.exit_code, command_line);
    debug!("STDOUT: {}", output.stdout);
    debug!("STDERR: {}", output.stderr);
}
