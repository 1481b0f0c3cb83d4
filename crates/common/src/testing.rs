//! Scripted command runner for tests
//!
//! Answers exact command lines with canned results and records every call.

use crate::shell::CommandRunner;
use crate::types::CommandResult;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
enum Reply {
    Output(CommandResult),
    Fail(String),
}

#[derive(Clone)]
struct Script {
    reply: Reply,
    delay: Option<Duration>,
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub command_line: String,
    pub elevated: bool,
    pub started_at: Instant,
}

/// Command runner that replays scripted results
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command_line` with the given stdout and exit code
    pub fn on(&self, command_line: &str, stdout: &str, exit_code: i32) -> &Self {
        self.insert(
            command_line,
            Reply::Output(CommandResult {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code,
            }),
        )
    }

    /// Answer `command_line` with a non-zero exit and the given stderr
    pub fn on_stderr(&self, command_line: &str, stderr: &str, exit_code: i32) -> &Self {
        self.insert(
            command_line,
            Reply::Output(CommandResult {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code,
            }),
        )
    }

    /// Make `command_line` fail as if the process could not be created
    pub fn fail(&self, command_line: &str, reason: &str) -> &Self {
        self.insert(command_line, Reply::Fail(reason.to_string()))
    }

    /// Make `command_line` take `delay` before returning
    pub fn delay(&self, command_line: &str, delay: Duration) -> &Self {
        if let Some(script) = self.scripts.lock().get_mut(command_line) {
            script.delay = Some(delay);
        }
        self
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// How many times `command_line` was run
    pub fn count(&self, command_line: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command_line == command_line)
            .count()
    }

    /// Start times of every run of `command_line`
    pub fn started_at(&self, command_line: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.command_line == command_line)
            .map(|c| c.started_at)
            .collect()
    }

    fn insert(&self, command_line: &str, reply: Reply) -> &Self {
        self.scripts.lock().insert(
            command_line.to_string(),
            Script { reply, delay: None },
        );
        self
    }

    async fn run(&self, command_line: &str, elevated: bool) -> Result<CommandResult> {
        self.calls.lock().push(Call {
            command_line: command_line.to_string(),
            elevated,
            started_at: Instant::now(),
        });

        let script = self.scripts.lock().get(command_line).cloned();
        let Some(script) = script else {
            return Ok(CommandResult {
                stdout: String::new(),
                stderr: format!("{}: not scripted", command_line),
                exit_code: 127,
            });
        };

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        match script.reply {
            Reply::Output(output) => Ok(output),
            Reply::Fail(reason) => Err(Error::Command(reason)),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, command_line: &str) -> Result<CommandResult> {
        self.run(command_line, false).await
    }

    async fn execute_elevated(&self, command_line: &str) -> Result<CommandResult> {
        self.run(command_line, true).await
    }
}
