//! Wren SDK
//!
//! Shared types for the Wren engine: tool schemas and side-effect classes,
//! tool input/output, the error taxonomy, and the cooperative interrupt token.

/// Error types and handling
pub mod errors;

/// Cooperative cancellation
pub mod interrupt;

/// Tool parameter schemas and side-effect classes
pub mod schema;

/// Tool input/output types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use interrupt::Interrupt;
pub use schema::{ParamSpec, ParamType, SideEffect, ToolSchema};
pub use types::{ToolError, ToolInput, ToolOutput};
