//! Local model server handler (Ollama chat dialect)
//!
//! Canonical messages flatten to text-only chat messages; the system prompt
//! becomes the leading system message; `stream` is always false.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::canonical::{CanonicalRequest, CanonicalResponse, ContentBlock, StopReason, Usage};
use crate::error::ProxyError;

use super::ProviderHandler;

/// Default local server address
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Handler for a local Ollama-compatible server
#[derive(Debug)]
pub struct OllamaHandler {
    base_url: String,
    http: Client,
}

impl OllamaHandler {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Canonical request → Ollama chat body
    fn build_body(&self, model: &str, request: &CanonicalRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in &request.messages {
            messages.push(json!({
                "role": message.role.as_str(),
                "content": message.content.flat_text(),
            }));
        }

        let mut options = json!({ "num_predict": request.max_tokens });
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            options["top_p"] = json!(top_p);
        }

        json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": options,
        })
    }

    fn map_error(&self, error: reqwest::Error) -> ProxyError {
        if error.is_connect() {
            ProxyError::LocalUnavailable {
                url: self.base_url.clone(),
            }
        } else {
            ProxyError::Network(error)
        }
    }
}

#[async_trait]
impl ProviderHandler for OllamaHandler {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn health(&self) -> Result<(), ProxyError> {
        let response = self
            .http
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProxyError::Upstream {
                status: response.status().as_u16(),
                message: "local server unhealthy".to_string(),
            })
        }
    }

    async fn complete(&self, model: &str, request: &CanonicalRequest) -> Result<CanonicalResponse, ProxyError> {
        debug!(model, "ollama: dispatching chat request");
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = self.build_body(model, request);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))?;

        let stop_reason = match parsed.done_reason.as_deref() {
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        Ok(CanonicalResponse::new(
            format!("ollama/{}", model),
            vec![ContentBlock::text(parsed.message.content.unwrap_or_default())],
            stop_reason,
            Usage {
                input_tokens: parsed.prompt_eval_count.unwrap_or(0),
                output_tokens: parsed.eval_count.unwrap_or(0),
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Message, MessageContent};

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            model: "ollama/llama3.3".to_string(),
            system: Some("be brief".to_string()),
            messages: vec![
                Message::user("hello"),
                Message {
                    role: crate::canonical::Role::Assistant,
                    content: MessageContent::Blocks(vec![
                        ContentBlock::text("part one, "),
                        ContentBlock::text("part two"),
                    ]),
                },
            ],
            max_tokens: 128,
            temperature: Some(0.2),
            top_p: None,
            tools: vec![],
        }
    }

    #[test]
    fn test_build_body_shape() {
        let handler = OllamaHandler::new(None);
        let body = handler.build_body("llama3.3", &request());

        assert_eq!(body["model"], "llama3.3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert!(body["options"].get("top_p").is_none());

        // System first, then flattened messages
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[1]["content"], "hello");
        assert_eq!(messages[2]["content"], "part one, part two");
    }

    #[test]
    fn test_default_base_url() {
        assert_eq!(OllamaHandler::new(None).base_url(), "http://localhost:11434");
        assert_eq!(
            OllamaHandler::new(Some("http://10.0.0.5:11434".to_string())).base_url(),
            "http://10.0.0.5:11434"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_actionable() {
        let handler = OllamaHandler::new(Some("http://127.0.0.1:9".to_string()));
        let err = handler.complete("llama3.3", &request()).await.unwrap_err();

        assert!(matches!(err, ProxyError::LocalUnavailable { .. }));
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("ollama serve"));
    }

    #[tokio::test]
    async fn test_health_unreachable_fails() {
        let handler = OllamaHandler::new(Some("http://127.0.0.1:9".to_string()));
        assert!(handler.health().await.is_err());
    }
}
