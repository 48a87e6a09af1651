//! Ollama LLM Provider
//!
//! Talks to a local Ollama server (typically http://localhost:11434) through
//! `/api/chat`. Tools are offered natively; models that reject the `tools`
//! field are retried once with the tools described in the system prompt, and
//! calls are then recovered from the reply text.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sdk::ToolSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    parse_tool_calls, text_protocol_prompt, LLMError, LLMProvider, Message, MessageRole,
    RawProposal, Result, ToolCall,
};

/// A parsed reply, or the HTTP status and body of a rejected request
type ChatOutcome = std::result::Result<OllamaResponse, (StatusCode, String)>;

pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "qwen2.5-coder:7b")
    model: String,

    client: Client,

    /// Cleared after the server rejects native tools for this model
    native_tools: AtomicBool,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            native_tools: AtomicBool::new(true),
        }
    }

    /// Describe tools in the prompt instead of sending them natively
    pub fn with_text_protocol(self) -> Self {
        self.native_tools.store(false, Ordering::Relaxed);
        self
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| OllamaToolCall {
                        function: OllamaFunction {
                            name: call.name.clone(),
                            arguments: call.parse_arguments().unwrap_or_else(|_| json!({})),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        native: bool,
    ) -> OllamaRequest {
        let mut ollama_messages = self.convert_messages(messages);
        let mut native_tools = Vec::new();

        if !tools.is_empty() {
            if native {
                native_tools = tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.to_json_schema(),
                            }
                        })
                    })
                    .collect();
            } else {
                let protocol = text_protocol_prompt(tools);
                match ollama_messages
                    .iter_mut()
                    .find(|m| m.role == MessageRole::System.to_string())
                {
                    Some(system) => {
                        system.content.push_str("\n\n");
                        system.content.push_str(&protocol);
                    }
                    None => ollama_messages.insert(
                        0,
                        OllamaMessage {
                            role: MessageRole::System.to_string(),
                            content: protocol,
                            tool_calls: Vec::new(),
                        },
                    ),
                }
            }
        }

        OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            stream: false,
            tools: native_tools,
        }
    }

    async fn chat(&self, request: &OllamaRequest) -> Result<ChatOutcome> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(
            "Ollama request: model={}, messages={}, tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Ok(Err((status, error_text)));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        Ok(Ok(parsed))
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
        self.native_tools.store(true, Ordering::Relaxed);
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn propose(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<RawProposal> {
        let mut native = self.native_tools.load(Ordering::Relaxed);
        let mut outcome = self.chat(&self.build_request(messages, tools, native)).await?;

        if let Err((status, text)) = &outcome {
            if *status == StatusCode::BAD_REQUEST
                && native
                && !tools.is_empty()
                && text.contains("does not support tools")
            {
                warn!(
                    "Model {} has no native tool support; using the text protocol",
                    self.model
                );
                self.native_tools.store(false, Ordering::Relaxed);
                native = false;
                outcome = self.chat(&self.build_request(messages, tools, native)).await?;
            }
        }

        let response = outcome.map_err(|(status, text)| {
            LLMError::ProviderUnavailable(format!("Ollama API error ({}): {}", status, text))
        })?;

        let content = response.message.content;
        let mut calls: Vec<ToolCall> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall::generated(call.function.name, call.function.arguments.to_string()))
            .collect();

        if calls.is_empty() && !tools.is_empty() {
            calls = parse_tool_calls(&content);
        }

        if calls.is_empty() {
            Ok(RawProposal::answer(content))
        } else {
            // Text-protocol replies are only JSON; keep prose only for native calls.
            let text = if native { content } else { String::new() };
            Ok(RawProposal::calls(text, calls))
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::ProviderUnavailable(format!(
                    "Cannot list models at {}: {}",
                    self.base_url, e
                ))
            }
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        let tags: OllamaTags = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama tags: {}", e)))?;
        let mut names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        names.sort();
        debug!("Ollama serves {} models", names.len());
        Ok(names)
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Ollama health check failed: {}", e);
                false
            }
        }
    }
}

/// `GET /api/tags` reply: the locally installed models
#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{ParamSpec, ParamType, SideEffect};

    fn provider() -> OllamaProvider {
        OllamaProvider::new("http://localhost:11434/", "qwen2.5-coder:7b", Duration::from_secs(5))
    }

    fn tools() -> Vec<ToolSchema> {
        vec![ToolSchema::new("file_read", "Read a file", SideEffect::ReadOnly)
            .param(ParamSpec::required("path", ParamType::String, "File path"))]
    }

    #[test]
    fn test_provider_properties() {
        let mut provider = provider();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_local());
        assert_eq!(provider.base_url, "http://localhost:11434");
        provider.set_model("llama3.1:8b");
        assert_eq!(provider.model(), "llama3.1:8b");
    }

    #[test]
    fn test_message_conversion_carries_tool_calls() {
        let provider = provider();
        let messages = vec![
            Message::system("You are a coding agent"),
            Message::user("Read a.txt"),
            Message::assistant_with_calls(
                "",
                vec![ToolCall::new("c1", "file_read", r#"{"path":"a.txt"}"#)],
            ),
            Message::tool_result("hello", "c1"),
        ];

        let converted = provider.convert_messages(&messages);
        let roles: Vec<_> = converted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(converted[2].tool_calls[0].function.arguments["path"], "a.txt");
    }

    #[test]
    fn test_native_request_sends_tools() {
        let provider = provider();
        let request = provider.build_request(&[Message::user("hi")], &tools(), true);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0]["function"]["name"], "file_read");
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_text_protocol_extends_system_prompt() {
        let provider = provider().with_text_protocol();
        let messages = vec![Message::system("Base prompt"), Message::user("hi")];
        let request = provider.build_request(&messages, &tools(), false);
        assert!(request.tools.is_empty());
        assert!(request.messages[0].content.starts_with("Base prompt"));
        assert!(request.messages[0].content.contains("file_read"));
    }
}
