//! `shell_exec`: run a shell command in the project
//!
//! Commands are screened for dangerous patterns, run through a
//! [`CommandRunner`], bounded by a timeout, and killed on interrupt. Output is
//! captured up to a byte limit; a non-zero exit is an `ExecutionFailed` that
//! carries the captured output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sdk::{ParamSpec, ParamType, SideEffect, ToolError, ToolInput, ToolOutput, ToolSchema};
use serde_json::json;
use tracing::{info, warn};

use super::{Preview, ToolContext, ToolHandler, ToolRegistry};
use crate::command_executor::{screen_command, CommandError, CommandRunner};

pub struct ShellTool {
    runner: Arc<dyn CommandRunner>,
    work_dir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellTool {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        work_dir: PathBuf,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            runner,
            work_dir,
            timeout,
            max_output_bytes,
        }
    }

    pub fn register(self: Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(
            "shell_exec",
            ToolSchema::new(
                "shell_exec",
                "Run a shell command (bash -c) in the project root and return its output.",
                SideEffect::Mutating,
            )
            .param(ParamSpec::required("command", ParamType::String, "Command line to run")),
            self,
        );
    }
}

fn command_error(err: CommandError) -> ToolError {
    match err {
        CommandError::Empty => ToolError::invalid_args("command is empty"),
        CommandError::Dangerous(_) => ToolError::rejected(err.to_string()),
        CommandError::ExecutionFailed(e) => {
            ToolError::execution_failed(format!("failed to start command: {}", e))
        }
    }
}

/// Output buffer that stops growing at a byte limit
struct Captured {
    text: String,
    limit: usize,
    truncated: bool,
}

impl Captured {
    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.text.len() + line.len() + 1 > self.limit {
            let mut room = self.limit.saturating_sub(self.text.len());
            while room > 0 && !line.is_char_boundary(room) {
                room -= 1;
            }
            self.text.push_str(&line[..room]);
            self.truncated = true;
            return;
        }
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn into_output(self) -> String {
        if self.truncated {
            format!("{}\n... (output truncated)", self.text)
        } else {
            self.text
        }
    }
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn preview(&self, input: &ToolInput) -> Result<Option<Preview>, ToolError> {
        let command = input.param_str("command")?;
        screen_command(command).map_err(command_error)?;
        Ok(Some(Preview {
            title: "Run shell command".to_string(),
            body: format!("$ {}", command),
            transaction: None,
        }))
    }

    async fn call(&self, input: ToolInput, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let command = input.param_str("command")?;
        info!("Executing shell command: {}", command);

        let mut running = self
            .runner
            .run(command, &self.work_dir)
            .await
            .map_err(command_error)?;

        let mut captured = Captured {
            text: String::new(),
            limit: self.max_output_bytes,
            truncated: false,
        };
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                line = running.lines.next() => match line {
                    Some(line) => captured.push_line(&line),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!("Command timed out after {:?}: {}", self.timeout, command);
                    let _ = running.handle.kill().await;
                    return Err(ToolError::ExecutionFailed {
                        message: format!("timed out after {}s", self.timeout.as_secs()),
                        output: Some(captured.into_output()),
                    });
                }
                _ = ctx.interrupt.triggered() => {
                    warn!("Command interrupted: {}", command);
                    let _ = running.handle.kill().await;
                    return Err(ToolError::Interrupted);
                }
            }
        }

        let status = tokio::select! {
            status = running.handle.wait() => status
                .map_err(|e| ToolError::execution_failed(format!("waiting for command: {}", e)))?,
            _ = &mut deadline => {
                let _ = running.handle.kill().await;
                return Err(ToolError::ExecutionFailed {
                    message: format!("timed out after {}s", self.timeout.as_secs()),
                    output: Some(captured.into_output()),
                });
            }
            _ = ctx.interrupt.triggered() => {
                let _ = running.handle.kill().await;
                return Err(ToolError::Interrupted);
            }
        };

        let truncated = captured.truncated;
        let output = captured.into_output();
        match status {
            Some(0) => Ok(ToolOutput::json(json!({
                "exit_code": 0,
                "output": output,
                "truncated": truncated,
            }))
            .with_summary(format!("$ {} (exit 0)", command))),
            Some(code) => Err(ToolError::ExecutionFailed {
                message: format!("command exited with status {}", code),
                output: Some(output),
            }),
            None => Err(ToolError::ExecutionFailed {
                message: "command was terminated by a signal".to_string(),
                output: Some(output),
            }),
        }
    }
}
