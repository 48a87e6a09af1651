//! Tool input/output types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input to a tool handler
///
/// `params` has already been validated against the tool's schema by the
/// registry by the time a handler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool: String,
    pub params: Map<String, Value>,
}

impl ToolInput {
    /// Create a new ToolInput with no parameters
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Map::new(),
        }
    }

    /// Build an input from a JSON arguments value (`null` means no arguments)
    pub fn from_args(tool: impl Into<String>, args: Value) -> Result<Self, ToolError> {
        let params = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::invalid_args(format!(
                    "arguments must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };
        Ok(Self {
            tool: tool.into(),
            params,
        })
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// The parameters as a JSON object value
    pub fn args(&self) -> Value {
        Value::Object(self.params.clone())
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<&str, ToolError> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid_args(format!("missing string parameter `{key}`")))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::invalid_args(format!("missing integer parameter `{key}`")))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    /// Get an optional bool parameter
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// Get a parameter as a JSON value
    pub fn param_json(&self, key: &str) -> Result<&Value, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::invalid_args(format!("missing parameter `{key}`")))
    }
}

/// Output from a tool handler
///
/// `data` is opaque to the engine; plan steps may reference it (or a JSON
/// pointer into it) from their arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ToolOutput {
    /// Create an output with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: serde_json::json!({ "text": text.into() }),
            summary: None,
        }
    }

    /// Create an output with JSON data
    pub fn json(data: Value) -> Self {
        Self {
            data,
            summary: None,
        }
    }

    /// Create an empty output
    pub fn empty() -> Self {
        Self {
            data: Value::Null,
            summary: None,
        }
    }

    /// Attach a one-line summary for display
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Convert the data to a JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.data).unwrap_or_else(|_| "null".to_string())
    }
}

/// Tool-level errors
///
/// Serializable so that failed tool calls replay exactly from the session store.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Invalid arguments: {message}")]
    InvalidArgs { message: String },

    #[error("Execution failed: {message}")]
    ExecutionFailed {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Rejected: {reason}")]
    Rejected { reason: String },

    #[error("File changed externally since it was staged: {path}")]
    EditConflict { path: String },

    #[error("Edit of {failed_path} failed and could not be reverted; indeterminate: {}", .paths.join(", "))]
    EditIrrecoverable {
        failed_path: String,
        paths: Vec<String>,
    },

    #[error("Interrupted")]
    Interrupted,
}

impl ToolError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            output: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, matching the serialized tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgs { .. } => "invalid_args",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::Rejected { .. } => "rejected",
            Self::EditConflict { .. } => "edit_conflict",
            Self::EditIrrecoverable { .. } => "edit_irrecoverable",
            Self::Interrupted => "interrupted",
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_args_accepts_object_and_null() {
        let input = ToolInput::from_args("file_read", json!({"path": "a.rs"})).unwrap();
        assert_eq!(input.param_str("path").unwrap(), "a.rs");

        let input = ToolInput::from_args("todo_read", Value::Null).unwrap();
        assert!(input.params.is_empty());
    }

    #[test]
    fn test_from_args_rejects_non_object() {
        let err = ToolInput::from_args("file_read", json!(["a.rs"])).unwrap_err();
        assert_eq!(err.kind(), "invalid_args");
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_param_accessors() {
        let input = ToolInput::new("test")
            .with_param("name", json!("Alice"))
            .with_param("count", json!(42))
            .with_param("flag", json!(false));

        assert_eq!(input.param_str("name").unwrap(), "Alice");
        assert_eq!(input.param_i64("count").unwrap(), 42);
        assert_eq!(input.param_bool_opt("flag"), Some(false));
        assert_eq!(input.param_str_opt("missing"), None);
        assert!(matches!(
            input.param_str("count"),
            Err(ToolError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn test_tool_output_text() {
        let output = ToolOutput::text("Hello, World!").with_summary("greeted");
        assert_eq!(output.data, json!({"text": "Hello, World!"}));
        assert_eq!(output.summary.as_deref(), Some("greeted"));
        assert_eq!(output.to_json(), r#"{"text":"Hello, World!"}"#);
    }

    #[test]
    fn test_tool_error_serializes_with_kind_tag() {
        let err = ToolError::ExecutionFailed {
            message: "exit status 2".into(),
            output: Some("ls: cannot access".into()),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "execution_failed");
        assert_eq!(value["output"], "ls: cannot access");

        let back: ToolError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);

        let value = serde_json::to_value(ToolError::Interrupted).unwrap();
        assert_eq!(value, json!({"kind": "interrupted"}));
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::EditIrrecoverable {
            failed_path: "b.rs".into(),
            paths: vec!["a.rs".into(), "b.rs".into()],
        };
        assert_eq!(
            err.to_string(),
            "Edit of b.rs failed and could not be reverted; indeterminate: a.rs, b.rs"
        );
        assert_eq!(
            ToolError::UnknownTool { name: "x".into() }.to_string(),
            "Unknown tool: x"
        );
    }
}
