//! Error types and handling
//!
//! This module provides the error types used throughout the Wren engine.
//! All errors implement the `EngineErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ToolError;

/// Trait for Wren error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the session consistent; the user can simply
    /// send another message. Non-recoverable errors need manual intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: Session store failures
/// - **Backend**: LLM provider failures and timeouts
/// - **Planning**: Malformed or cyclic plans
/// - **Editing**: Conflicts and failed reverts during a commit
/// - **File System**: Path validation and access errors
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
/// use std::path::PathBuf;
///
/// let error = EngineError::PathDenied(PathBuf::from(".ssh"));
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::EditIrrecoverable {
///     failed_path: PathBuf::from("src/lib.rs"),
///     paths: vec![PathBuf::from("src/main.rs")],
/// };
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("LLM call timed out after {0}s")]
    LLMTimeout(u64),

    #[error("Unknown LLM provider: {0}")]
    ProviderNotFound(String),

    #[error("Plan rejected: {0}")]
    PlanValidation(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("File changed externally since it was staged: {0:?}")]
    EditConflict(PathBuf),

    #[error("Edit of {failed_path:?} failed and could not be reverted; indeterminate paths: {paths:?}")]
    EditIrrecoverable {
        failed_path: PathBuf,
        paths: Vec<PathBuf>,
    },

    #[error("Path denied: {0:?}")]
    PathDenied(PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(PathBuf, String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Session storage failed. Check the data directory permissions",
            Self::BackendUnavailable(_) => {
                "LLM backend unavailable. Check that the provider is running and reachable"
            }
            Self::LLMTimeout(_) => "LLM backend took too long to respond. Try again",
            Self::ProviderNotFound(_) => "Use /model ollama or /model openai",
            Self::PlanValidation(_) => "The model proposed an invalid plan. Try rephrasing",
            Self::Tool(ToolError::InvalidArgs { .. }) => "The model sent malformed tool arguments",
            Self::Tool(ToolError::Rejected { .. }) => "The operation was declined",
            Self::Tool(_) => "Tool operation failed",
            Self::EditConflict(_) => "The file changed on disk. Ask again to re-stage the edit",
            Self::EditIrrecoverable { .. } => {
                "Some files could not be restored. Inspect the listed paths by hand"
            }
            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must be within the project",
            Self::PathCanonicalization(_, _) => "Invalid path specified",
            Self::SessionNotFound(_) => "Run 'wren sessions' to list available sessions",
            Self::Interrupted => "Interrupted. The partial turn was saved",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::EditIrrecoverable { .. } | Self::Database(_) | Self::Config(_)
        )
    }
}

impl From<EngineError> for ToolError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Tool(inner) => inner,
            denied @ (EngineError::PathDenied(_)
            | EngineError::PathOutsideWorkspace(_)
            | EngineError::PathCanonicalization(_, _)) => ToolError::Rejected {
                reason: denied.to_string(),
            },
            EngineError::EditConflict(path) => ToolError::EditConflict {
                path: path.display().to_string(),
            },
            EngineError::EditIrrecoverable { failed_path, paths } => {
                ToolError::EditIrrecoverable {
                    failed_path: failed_path.display().to_string(),
                    paths: paths.iter().map(|p| p.display().to_string()).collect(),
                }
            }
            EngineError::Interrupted => ToolError::Interrupted,
            other => ToolError::execution_failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irrecoverable_lists_paths() {
        let err = EngineError::EditIrrecoverable {
            failed_path: PathBuf::from("b.txt"),
            paths: vec![PathBuf::from("a.txt")],
        };
        let message = err.to_string();
        assert!(message.contains("b.txt"));
        assert!(message.contains("a.txt"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_tool_error_converts_transparently() {
        let err: EngineError = ToolError::invalid_args("missing field `path`").into();
        assert_eq!(err.to_string(), "Invalid arguments: missing field `path`");
        assert_eq!(err.user_hint(), "The model sent malformed tool arguments");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_path_errors_become_rejections() {
        let err: ToolError = EngineError::PathOutsideWorkspace(PathBuf::from("/etc")).into();
        assert_eq!(err.kind(), "rejected");

        let err: ToolError = EngineError::Tool(ToolError::Interrupted).into();
        assert_eq!(err, ToolError::Interrupted);
    }

    #[test]
    fn test_backend_errors_are_recoverable() {
        assert!(EngineError::BackendUnavailable("connection refused".into()).is_recoverable());
        assert!(EngineError::LLMTimeout(120).is_recoverable());
    }
}
