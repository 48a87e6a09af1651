//! OpenAI-compatible provider
//!
//! Works against any `/chat/completions` endpoint that speaks the OpenAI
//! function-calling dialect. The API key is read from the environment
//! variable named in the config; endpoints that need no key (local servers)
//! simply leave it unset.

use async_trait::async_trait;
use reqwest::Client;
use sdk::ToolSchema;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{LLMError, LLMProvider, Message, MessageRole, RawProposal, Result, ToolCall};

pub struct OpenAIProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build a provider whose key comes from `$api_key_env`
    pub fn from_env(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: &str,
        timeout: Duration,
    ) -> Self {
        let api_key = std::env::var(api_key_env).ok();
        if api_key.is_none() {
            debug!("{} is not set; sending requests without a key", api_key_env);
        }
        Self::new(base_url, model, api_key, timeout)
    }

    fn convert_message(msg: &Message) -> Value {
        match msg.role {
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
            MessageRole::Assistant if !msg.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": msg.content,
                "tool_calls": msg.tool_calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })).collect::<Vec<_>>(),
            }),
            role => json!({
                "role": role.to_string(),
                "content": msg.content,
            }),
        }
    }

    fn build_payload(&self, messages: &[Message], tools: &[ToolSchema]) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages.iter().map(Self::convert_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            payload["tools"] = tools
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
        }
        payload
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Pull text and tool calls out of a chat-completions response body
fn parse_completion(data: &Value) -> Result<RawProposal> {
    let message = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut calls = Vec::new();
    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let function = call
            .get("function")
            .ok_or_else(|| LLMError::ParseError("tool call without function".to_string()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| LLMError::ParseError("tool call without name".to_string()))?;
        let arguments = match function.get("arguments") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        calls.push(match call.get("id").and_then(Value::as_str) {
            Some(id) => ToolCall::new(id, name, arguments),
            None => ToolCall::generated(name, arguments),
        });
    }

    Ok(RawProposal::calls(text, calls))
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn propose(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<RawProposal> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.build_payload(messages, tools);

        let start = std::time::Instant::now();
        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!("Cannot connect to {}", self.base_url))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        info!(
            "OpenAI-compatible response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        parse_completion(&data)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::ProviderUnavailable(format!("Cannot connect to {}", self.base_url))
                }
            })?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;
        let mut ids: Vec<String> = data["data"]
            .as_array()
            .ok_or_else(|| LLMError::ParseError("model list has no data array".to_string()))?
            .iter()
            .filter_map(|m| m["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("OpenAI health check failed: {}", e);
                false
            }
        }
    }
}

/// Map a non-success HTTP reply onto the provider error taxonomy
async fn status_error(response: reqwest::Response) -> LLMError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => LLMError::AuthenticationFailed(text),
        429 => LLMError::RateLimitExceeded,
        400..=499 => LLMError::InvalidRequest(text),
        _ => LLMError::ProviderUnavailable(format!("API error ({}): {}", status, text)),
    }
}
