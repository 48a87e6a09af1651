//! CLI interface for Wren
//!
//! Command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    " ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Wren coding agent
///
/// A terminal coding agent that plans multi-step work, edits files
/// atomically and keeps a per-project todo list.
#[derive(Parser, Debug)]
#[command(name = "wren")]
#[command(version, long_version = LONG_VERSION, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive conversation in the current project
    Chat {
        /// Continue the project's most recent session
        #[arg(short, long, conflicts_with = "resume")]
        r#continue: bool,

        /// Resume a specific session
        #[arg(short, long, value_name = "SESSION_ID")]
        resume: Option<String>,

        /// Backend to start with (ollama, openai)
        #[arg(long)]
        provider: Option<String>,

        /// Model to start with
        #[arg(long)]
        model: Option<String>,

        /// Apply mutating tool calls without asking (destructive ones still ask)
        #[arg(short, long)]
        yes: bool,
    },

    /// List the project's sessions, newest first
    Sessions,

    /// Print a stored session with every tool call
    Replay {
        /// Session ID to replay
        session_id: String,
    },

    /// Show the project's todos
    Todos {
        /// Include completed items
        #[arg(long)]
        all: bool,
    },

    /// Run configuration and backend diagnostics
    Doctor,
}
