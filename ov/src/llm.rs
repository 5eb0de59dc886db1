//! LLM fallback analyzer
//!
//! When the rule engine draws a blank on a buffer of recent log text, this
//! asks a chat-completions endpoint to classify it against the anomaly
//! menu. Everything that can go wrong (network, status, parsing, low
//! confidence) degrades to "no match" without surfacing an error.

use std::time::Duration;

use handlebars::Handlebars;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::analyzer::IssueKind;
use crate::queue::{Priority, TaskInput};

/// Minimum confidence before a classification becomes a task
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.7;

/// Bounded request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Anomaly menu offered to the model
const ANOMALY_MENU: [&str; 16] = [
    "loop_detected",
    "explicit_failure",
    "phase_stuck",
    "silence",
    "tdd_violation",
    "out_of_order",
    "missing_milestones",
    "abrupt_stop",
    "abandoned_agent",
    "declining_velocity",
    "regression",
    "iron_law_violation",
    "iron_law_repeated",
    "iron_law_ignored",
    "spec_drift_structural",
    "spec_drift_criteria",
];

const CLASSIFY_TEMPLATE: &str = "\
You monitor a phased development workflow. Classify the anomaly in the log \
excerpt below, if any.\n\
Respond with a single JSON object: {\"anomaly_type\": <one of {{kinds}}>, \
\"confidence\": <0..1>, \"suggested_agent\": <agent name>, \
\"prompt\": <one-sentence remediation instruction>}.\n\
If nothing looks wrong, use confidence 0.\n\n\
LOG EXCERPT:\n{{window}}";

/// Connection settings for the classification endpoint
#[derive(Debug, Clone)]
pub struct LlmAnalyzerConfig {
    /// Chat-completions base URL
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub confidence_floor: f64,
    pub timeout: Duration,
}

impl Default for LlmAnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-3.5-haiku".to_string(),
            api_key: None,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Confidence-gated fallback classifier
pub struct LlmAnalyzer {
    config: LlmAnalyzerConfig,
    http: Client,
}

impl LlmAnalyzer {
    pub fn new(config: LlmAnalyzerConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Classify a recent-log window; `None` means "nothing actionable"
    pub async fn classify(&self, window: &str) -> Option<TaskInput> {
        if window.trim().is_empty() {
            return None;
        }
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            debug!("llm analyzer: no API key configured, skipping");
            return None;
        };

        let prompt = self.render_prompt(window)?;
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": 512,
            "temperature": 0.0,
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = match self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "llm analyzer: request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), "llm analyzer: non-success status");
            return None;
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "llm analyzer: unparsable response body");
                return None;
            }
        };

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)?;
        self.task_from_classification(&content)
    }

    fn render_prompt(&self, window: &str) -> Option<String> {
        let registry = Handlebars::new();
        let data = json!({
            "window": window,
            "kinds": ANOMALY_MENU.join(", "),
        });
        match registry.render_template(CLASSIFY_TEMPLATE, &data) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                warn!(error = %e, "llm analyzer: prompt render failed");
                None
            }
        }
    }

    /// Turn the model's JSON reply into a task, applying the gate
    fn task_from_classification(&self, content: &str) -> Option<TaskInput> {
        let verdict: Classification = match serde_json::from_str(extract_json(content)) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "llm analyzer: classification is not valid JSON");
                return None;
            }
        };

        if !ANOMALY_MENU.contains(&verdict.anomaly_type.as_str()) {
            debug!(kind = %verdict.anomaly_type, "llm analyzer: kind outside menu");
            return None;
        }
        if verdict.confidence < self.config.confidence_floor {
            debug!(
                confidence = verdict.confidence,
                floor = self.config.confidence_floor,
                "llm analyzer: below confidence floor"
            );
            return None;
        }

        let priority = serde_json::from_value::<IssueKind>(json!(verdict.anomaly_type))
            .map(|kind| kind.priority())
            .unwrap_or(Priority::Medium);

        let mut context = verdict.context.unwrap_or_default();
        context.insert("confidence".to_string(), json!(verdict.confidence));

        Some(TaskInput {
            priority,
            source: "llm_analyzer".to_string(),
            anomaly_type: verdict.anomaly_type.clone(),
            prompt: verdict
                .prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| format!("Investigate the reported {} anomaly.", verdict.anomaly_type)),
            suggested_agent: verdict
                .suggested_agent
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "debugger".to_string()),
            context,
        })
    }
}

/// Strip markdown fences the model may wrap its JSON in
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[derive(Debug, Deserialize)]
struct Classification {
    anomaly_type: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    suggested_agent: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    context: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
