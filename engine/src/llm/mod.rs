//! LLM Provider Abstraction Layer
//!
//! The conversation loop treats the model as a black box:
//! `propose(context, tools) -> {text, tool_calls}`. Each backend implements
//! [`LLMProvider`]; [`router::ModelRouter`] holds the configured backends and
//! the active selection.
//!
//! Backends without native tool calling fall back to a text protocol, parsed
//! by [`parse_tool_calls`].

use async_trait::async_trait;
use sdk::{EngineError, ToolError, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod ollama;
pub mod openai;
pub mod router;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use router::ModelRouter;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        EngineError::BackendUnavailable(err.to_string())
    }
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Tool call ID for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Assistant message that requested tool calls
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Call with a freshly generated id, for backends that don't assign one
    pub fn generated(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::new(format!("call_{}", uuid::Uuid::new_v4()), name, arguments)
    }

    /// Decode the argument text. An empty string means no arguments.
    pub fn parse_arguments(&self) -> std::result::Result<Value, ToolError> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments).map_err(|e| {
            ToolError::invalid_args(format!(
                "{}: arguments are not valid JSON: {}",
                self.name, e
            ))
        })
    }
}

/// What a backend returned for one `propose` call, before any validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProposal {
    /// Natural-language part of the reply
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl RawProposal {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
        }
    }
}

/// LLM Provider trait that all backends implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name as used by `/model` (e.g. "ollama", "openai")
    fn name(&self) -> &str;

    /// Model currently requested from the backend
    fn model(&self) -> &str;

    /// Change the model used for subsequent requests
    fn set_model(&mut self, model: &str);

    /// Returns true if the backend runs on this machine
    fn is_local(&self) -> bool;

    /// Ask the model for its next move given the conversation and the
    /// tools it may call.
    async fn propose(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<RawProposal>;

    /// Free-form completion for a single constrained prompt. No tools.
    async fn infer(&self, prompt: &str) -> Result<String> {
        let proposal = self.propose(&[Message::user(prompt)], &[]).await?;
        Ok(proposal.text)
    }

    /// Check if the provider is currently reachable
    async fn check_health(&self) -> bool {
        true
    }

    /// Models this backend can serve right now. Backends without discovery
    /// report only the configured model.
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.model().to_string()])
    }
}

/// Tool section of the system prompt for the text protocol
pub fn text_protocol_prompt(tools: &[ToolSchema]) -> String {
    let mut parts = vec![
        "To call tools, reply with only a JSON array of calls, e.g.".to_string(),
        r#"[{"function": "file_read", "arguments": {"path": "src/main.rs"}}]"#.to_string(),
        "Otherwise reply in plain text.".to_string(),
        String::new(),
        "Available tools:".to_string(),
    ];
    for tool in tools {
        parts.push(format!(
            "- {} ({}): {}",
            tool.name, tool.side_effect, tool.description
        ));
        parts.push(format!("  parameters: {}", tool.to_json_schema()));
    }
    parts.join("\n")
}

/// Parse tool calls out of free text.
///
/// Handles these LLM output formats:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}`, or an array of those
/// 2. Fenced JSON (with or without trailing text)
/// 3. `<tool_call>name({...})</tool_call>` markers, possibly repeated
/// 4. `{"function": ...}` objects embedded in prose
///
/// `"name"` is accepted in place of `"function"`. Returns an empty vector when
/// the text contains no calls.
pub fn parse_tool_calls(content: &str) -> Vec<ToolCall> {
    let trimmed = content.trim();

    if let Some(calls) = try_parse_calls_json(trimmed) {
        return calls;
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(calls) = try_parse_calls_json(inner.trim()) {
            return calls;
        }
    }

    let marked = parse_marker_calls(trimmed);
    if !marked.is_empty() {
        return marked;
    }

    let mut calls = Vec::new();
    let mut rest = trimmed;
    while let Some(pos) = rest.find("{\"function\"") {
        let candidate = &rest[pos..];
        match extract_balanced_json(candidate) {
            Some(json_str) => {
                if let Some(call) = serde_json::from_str(json_str)
                    .ok()
                    .and_then(|v: Value| call_from_value(&v))
                {
                    calls.push(call);
                }
                rest = &candidate[json_str.len()..];
            }
            None => break,
        }
    }
    calls
}

/// A whole string that is one call object or an array of them
fn try_parse_calls_json(s: &str) -> Option<Vec<ToolCall>> {
    let json: Value = serde_json::from_str(s).ok()?;
    match &json {
        Value::Array(items) if !items.is_empty() => {
            items.iter().map(call_from_value).collect::<Option<Vec<_>>>()
        }
        Value::Object(_) => call_from_value(&json).map(|call| vec![call]),
        _ => None,
    }
}

fn call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value
        .get("function")
        .or_else(|| value.get("name"))?
        .as_str()?;
    let arguments = match value.get("arguments") {
        Some(Value::String(text)) => text.clone(),
        Some(args) => args.to_string(),
        None => "{}".to_string(),
    };
    Some(ToolCall::generated(name, arguments))
}

fn parse_marker_calls(content: &str) -> Vec<ToolCall> {
    const OPEN: &str = "<tool_call>";
    const CLOSE: &str = "</tool_call>";

    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(OPEN) {
        let body_start = start + OPEN.len();
        let Some(end) = rest[body_start..].find(CLOSE) else {
            break;
        };
        let body = &rest[body_start..body_start + end];
        if let Some(paren_pos) = body.find('(') {
            let args_end = body.rfind(')').unwrap_or(body.len());
            calls.push(ToolCall::generated(
                body[..paren_pos].trim(),
                body[paren_pos + 1..args_end].trim(),
            ));
        }
        rest = &rest[body_start + end + CLOSE.len()..];
    }
    calls
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing fence.
pub(crate) fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close.
pub(crate) fn extract_balanced_json(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
