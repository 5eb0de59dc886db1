//! Remote OpenAI-dialect handler (OpenRouter)
//!
//! Canonical requests become `chat/completions` calls with Bearer auth and
//! identity headers; `finish_reason` maps back onto canonical stop reasons.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::canonical::{
    CanonicalRequest, CanonicalResponse, ContentBlock, Message, MessageContent, Role, StopReason, Usage,
};
use crate::error::ProxyError;

use super::ProviderHandler;

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Identity headers the service expects from clients
const REFERER: &str = "https://github.com/overseer/modelmux";
const TITLE: &str = "modelmux";

/// Handler for the OpenRouter chat-completions dialect
#[derive(Debug)]
pub struct OpenRouterHandler {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenRouterHandler {
    /// Requires a non-empty API key
    pub fn new(api_key: String) -> Result<Self, ProxyError> {
        if api_key.trim().is_empty() {
            return Err(ProxyError::MissingApiKey("openrouter"));
        }
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http: Client::new(),
        })
    }

    /// Override the API root (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Canonical request → chat-completions body
    fn build_body(&self, model: &str, request: &CanonicalRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(convert_messages(&request.messages));

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools.iter().map(|t| t.to_openai_schema()).collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn parse_response(&self, model: &str, api: ChatCompletionsResponse) -> CanonicalResponse {
        let choice = api.choices.into_iter().next();

        let (content, stop_reason) = match choice {
            Some(choice) => {
                let mut blocks = Vec::new();
                if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
                    blocks.push(ContentBlock::text(text));
                }
                for call in choice.message.tool_calls.unwrap_or_default() {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        input: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({})),
                    });
                }
                (blocks, StopReason::from_finish_reason(choice.finish_reason.as_deref()))
            }
            None => (Vec::new(), StopReason::EndTurn),
        };

        CanonicalResponse::new(
            format!("openrouter/{}", model),
            content,
            stop_reason,
            Usage {
                input_tokens: api.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                output_tokens: api.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
            },
        )
    }
}

/// Canonical messages → OpenAI-dialect messages
///
/// The dialect wants one message per tool result, and tool calls hang off
/// assistant messages rather than appearing as content blocks.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result = Vec::new();

    for message in messages {
        match &message.content {
            MessageContent::Text(text) => {
                result.push(json!({ "role": message.role.as_str(), "content": text }));
            }
            MessageContent::Blocks(blocks) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                let mut tool_results = Vec::new();

                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": input.to_string() },
                        })),
                        ContentBlock::ToolResult {
                            tool_use_id, content, ..
                        } => tool_results.push((tool_use_id.clone(), content.clone())),
                    }
                }

                if !tool_results.is_empty() {
                    for (tool_call_id, content) in tool_results {
                        result.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                    continue;
                }

                if !tool_calls.is_empty() {
                    let mut value = json!({ "role": "assistant", "tool_calls": tool_calls });
                    if !text.is_empty() {
                        value["content"] = json!(text);
                    }
                    result.push(value);
                    continue;
                }

                result.push(json!({ "role": message.role.as_str(), "content": text }));
            }
        }
    }

    result
}

#[async_trait]
impl ProviderHandler for OpenRouterHandler {
    fn provider(&self) -> &'static str {
        "openrouter"
    }

    async fn health(&self) -> Result<(), ProxyError> {
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProxyError::Upstream {
                status: response.status().as_u16(),
                message: "model list unavailable".to_string(),
            })
        }
    }

    async fn complete(&self, model: &str, request: &CanonicalRequest) -> Result<CanonicalResponse, ProxyError> {
        debug!(model, "openrouter: dispatching chat completion");
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_body(model, request);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionsResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))?;
        Ok(self.parse_response(model, parsed))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Debug, Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
