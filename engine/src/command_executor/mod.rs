//! Shell command execution
//!
//! `shell_exec` talks to a [`CommandRunner`] rather than to the OS directly.
//! [`BashRunner`] is the real one: it runs `bash -c` in the workspace with
//! stdin closed and streams stdout and stderr back line by line.

use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Refusing to run dangerous command (matched `{0}`)")]
    Dangerous(String),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(#[from] io::Error),
}

/// Patterns that are refused before anything is spawned
const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-[a-zA-Z]*r[a-zA-Z]*f?[a-zA-Z]*\s+/(\s|$|\*)",
    r"rm\s+-[a-zA-Z]*f[a-zA-Z]*r[a-zA-Z]*\s+/(\s|$|\*)",
    r"\bmkfs(\.\w+)?\b",
    r"\bdd\s+if=",
    r":\(\)\s*\{",
    r"\bsudo\s+rm\b",
    r"\bsudo\s+dd\b",
    r"\bformat\s+[a-zA-Z]:",
    r">\s*/dev/(sd|hd|nvme|disk)",
    r"chmod\s+(-R\s+)?777\s+/(\s|$)",
];

/// Screens a command line against the dangerous pattern list.
pub fn screen_command(command: &str) -> Result<(), CommandError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Empty);
    }

    for pattern in DANGEROUS_PATTERNS {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(trimmed) => {
                warn!("Blocked dangerous command: {}", trimmed);
                return Err(CommandError::Dangerous(
                    re.find(trimmed)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                ));
            }
            Ok(_) => {}
            Err(e) => warn!("Invalid dangerous-command pattern {}: {}", pattern, e),
        }
    }
    Ok(())
}

/// Control over a spawned process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for exit. `None` when the process was killed by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    async fn kill(&mut self) -> io::Result<()>;
}

/// A spawned command: merged output lines plus a handle to the process
pub struct RunningCommand {
    pub lines: BoxStream<'static, String>,
    pub handle: Box<dyn ProcessHandle>,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path) -> Result<RunningCommand, CommandError>;
}

/// Runs commands through `bash -c`
#[derive(Debug, Default, Clone)]
pub struct BashRunner;

struct ChildHandle(Child);

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> io::Result<Option<i32>> {
        self.0.wait().await.map(|status| status.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.0.kill().await
    }
}

fn line_stream<R>(reader: R) -> BoxStream<'static, String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            _ => None,
        }
    })
    .boxed()
}

#[async_trait]
impl CommandRunner for BashRunner {
    async fn run(&self, command: &str, cwd: &Path) -> Result<RunningCommand, CommandError> {
        screen_command(command)?;
        debug!("Spawning: bash -c {:?} in {}", command, cwd.display());

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

        Ok(RunningCommand {
            lines: stream::select(line_stream(stdout), line_stream(stderr)).boxed(),
            handle: Box::new(ChildHandle(child)),
        })
    }
}
