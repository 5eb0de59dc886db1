//! Intervention generator
//!
//! Pure mapping from an issue to a response: how loudly to react, what to
//! tell the user, and whether to queue a remediation task.

mod catalog;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::analyzer::{Issue, IssueKind};
use crate::queue::{Priority, TaskInput};

/// Hard limits on notification copy
const TITLE_MAX: usize = 20;
const MESSAGE_MAX: usize = 50;

/// How strongly the supervisor reacts to an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    AutoRemediate,
    NotifySuggest,
    NotifyOnly,
}

impl ResponseKind {
    /// Confidence mapping: > 0.9 remediate, 0.7–0.9 suggest, else notify
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.9 {
            Self::AutoRemediate
        } else if confidence >= 0.7 {
            Self::NotifySuggest
        } else {
            Self::NotifyOnly
        }
    }
}

/// Urgency of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    High,
    Critical,
}

/// A rendered user-facing notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: NotifyPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// The full reaction to one issue
#[derive(Debug, Clone)]
pub struct Intervention {
    pub response: ResponseKind,
    pub notification: Notification,
    pub task: Option<TaskInput>,
}

/// Issue → intervention, with copy drawn from the catalog
pub struct InterventionGenerator {
    registry: Handlebars<'static>,
}

impl Default for InterventionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl InterventionGenerator {
    pub fn new() -> Self {
        // Non-strict: missing keys render empty, then fallbacks fill them
        let registry = Handlebars::new();
        Self { registry }
    }

    /// Produce the intervention for an issue
    pub fn generate(&self, issue: &Issue) -> Intervention {
        let entry = catalog::entry_for(issue.kind);
        let response = ResponseKind::from_confidence(issue.confidence);
        let data = render_data(&issue.context, entry.defaults);

        let message = truncate(&self.render(entry.message, &data), MESSAGE_MAX);
        let title = truncate(entry.title, TITLE_MAX);
        let prompt = self.render(entry.prompt, &data);

        let priority = issue.kind.priority();
        let notification = Notification {
            title,
            message,
            priority: notify_priority(priority),
            sound: notify_sound(priority),
        };

        let task = match response {
            ResponseKind::NotifyOnly => None,
            ResponseKind::AutoRemediate | ResponseKind::NotifySuggest => Some(TaskInput {
                priority,
                source: "workflow_analyzer".to_string(),
                anomaly_type: issue.kind.to_string(),
                prompt,
                suggested_agent: entry.agent.to_string(),
                context: issue.context.clone(),
            }),
        };

        debug!(kind = %issue.kind, ?response, "intervention: generated");
        Intervention {
            response,
            notification,
            task,
        }
    }

    fn render(&self, template: &str, data: &Map<String, Value>) -> String {
        match self.registry.render_template(template, data) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "Failed to render template, using raw copy");
                template.to_string()
            }
        }
    }
}

/// Map a task priority onto the notification urgency scale
fn notify_priority(priority: Priority) -> NotifyPriority {
    match priority {
        Priority::Critical => NotifyPriority::Critical,
        Priority::High => NotifyPriority::High,
        Priority::Medium | Priority::Low => NotifyPriority::Low,
    }
}

fn notify_sound(priority: Priority) -> Option<String> {
    match priority {
        Priority::Critical => Some("Basso".to_string()),
        Priority::High => Some("Ping".to_string()),
        Priority::Medium | Priority::Low => None,
    }
}

/// Context with fallbacks applied; placeholder tokens never leak through
fn render_data(context: &Map<String, Value>, defaults: &[(&str, &str)]) -> Map<String, Value> {
    let mut data = context.clone();

    for (key, fallback) in defaults {
        let needs_fallback = match data.get(*key) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty() || s.eq_ignore_ascii_case("unknown"),
            Some(_) => false,
        };
        if needs_fallback {
            data.insert(key.to_string(), json!(fallback));
        }
    }

    data
}

/// Truncate on a char boundary
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
