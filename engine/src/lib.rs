//! Wren Engine Library
//!
//! The core of the wren coding agent. Used by the binary and by the
//! integration tests.

/// Configuration management module
pub mod config;

/// File system security module
pub mod fs_guard;

/// Shell command screening and execution
pub mod command_executor;

/// Atomic multi-file edits
pub mod transaction;

/// Session and todo persistence
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// Per-project todo ledger
pub mod todo;

/// Plan interpretation, validation and execution
pub mod conductor;

/// Built-in tools and the tool registry
pub mod tools;

/// Conversation loop
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Terminal frontend
pub mod console;

/// Command handlers module
pub mod handlers;
