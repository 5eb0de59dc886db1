//! Log entry types and the human summary format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event kinds a producer may log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    PhaseStart,
    PhaseComplete,
    Milestone,
    AgentSpawn,
    AgentComplete,
    Complete,
    Failed,
    IronLawCheck,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "START",
            Self::PhaseStart => "PHASE_START",
            Self::PhaseComplete => "PHASE_COMPLETE",
            Self::Milestone => "MILESTONE",
            Self::AgentSpawn => "AGENT_SPAWN",
            Self::AgentComplete => "AGENT_COMPLETE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::IronLawCheck => "IRON_LAW_CHECK",
        };
        write!(f, "{}", s)
    }
}

/// Delegated-agent descriptor carried on agent events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRef {
    #[serde(rename = "type")]
    pub agent_type: String,
    pub id: String,
    pub parent_cmd: String,
}

/// Display labels for the six laws, in law order
pub const LAW_LABELS: [(&str, &str); 6] = [
    ("law1_tdd", "Write tests first"),
    ("law2_behavior_tests", "Test behavior, not implementation"),
    ("law3_no_loops", "No repeated tool loops"),
    ("law4_feature_branch", "Work on a feature branch"),
    ("law5_delegation", "Delegate to specialized agents"),
    ("law6_docs_synced", "Keep docs in sync"),
];

/// Six-law compliance checklist attached to completion entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LawChecklist {
    pub law1_tdd: bool,
    pub law2_behavior_tests: bool,
    pub law3_no_loops: bool,
    pub law4_feature_branch: bool,
    pub law5_delegation: bool,
    pub law6_docs_synced: bool,
}

impl LawChecklist {
    /// All six verdicts in law order
    pub fn verdicts(&self) -> [bool; 6] {
        [
            self.law1_tdd,
            self.law2_behavior_tests,
            self.law3_no_loops,
            self.law4_feature_branch,
            self.law5_delegation,
            self.law6_docs_synced,
        ]
    }

    /// How many laws were observed
    pub fn passed_count(&self) -> usize {
        self.verdicts().iter().filter(|v| **v).count()
    }
}

/// One structured event in the workflow log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRef>,
    #[serde(rename = "ironLaws", skip_serializing_if = "Option::is_none")]
    pub iron_laws: Option<LawChecklist>,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(cmd: impl Into<String>, event: EventKind) -> Self {
        Self {
            ts: Utc::now(),
            cmd: cmd.into().to_lowercase(),
            phase: None,
            event,
            data: Map::new(),
            agent: None,
            iron_laws: None,
        }
    }

    /// Set the phase name
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Add a payload key
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach a delegated-agent descriptor
    pub fn with_agent(mut self, agent: AgentRef) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Attach a compliance checklist
    pub fn with_checklist(mut self, checklist: LawChecklist) -> Self {
        self.iron_laws = Some(checklist);
        self
    }

    /// Payload value as a string, when present and a string
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The `CMD[:PHASE]:EVENT - <description>` summary line body
    pub fn summary(&self) -> String {
        let mut head = self.cmd.to_uppercase();
        if let Some(phase) = &self.phase {
            head.push(':');
            head.push_str(&phase.to_uppercase());
        }
        let description = self.description();
        if description.is_empty() {
            format!("{}:{} -", head, self.event)
        } else {
            format!("{}:{} - {}", head, self.event, description)
        }
    }

    /// Human description for the summary line
    fn description(&self) -> String {
        // Agent descriptor wins regardless of event kind
        if self.agent.is_some() || matches!(self.event, EventKind::AgentSpawn | EventKind::AgentComplete) {
            let agent_type = self
                .agent
                .as_ref()
                .map(|a| a.agent_type.as_str())
                .or_else(|| self.data_str("agent_type"))
                .unwrap_or("agent");
            return match self.data_str("task") {
                Some(task) => format!("{}: {}", agent_type, task),
                None => agent_type.to_string(),
            };
        }

        match self.event {
            EventKind::Complete => self.data_str("summary").unwrap_or_default().to_string(),
            EventKind::Failed => self.data_str("error").unwrap_or_default().to_string(),
            EventKind::Start => match self.data.get("args").and_then(Value::as_array) {
                Some(args) => args
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
                None => String::new(),
            },
            EventKind::Milestone => self.data_str("description").unwrap_or_default().to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_serializes_screaming() {
        assert_eq!(serde_json::to_string(&EventKind::PhaseStart).unwrap(), "\"PHASE_START\"");
        let kind: EventKind = serde_json::from_str("\"IRON_LAW_CHECK\"").unwrap();
        assert_eq!(kind, EventKind::IronLawCheck);
    }

    #[test]
    fn test_summary_complete_with_summary() {
        let entry = LogEntry::new("ideate", EventKind::Complete).with_data("summary", json!("Design complete"));
        assert_eq!(entry.summary(), "IDEATE:COMPLETE - Design complete");
    }

    #[test]
    fn test_summary_failed_with_error() {
        let entry = LogEntry::new("ship", EventKind::Failed).with_data("error", json!("push rejected"));
        assert_eq!(entry.summary(), "SHIP:FAILED - push rejected");
    }

    #[test]
    fn test_summary_start_joins_args() {
        let entry = LogEntry::new("plan", EventKind::Start).with_data("args", json!(["--fast", "auth"]));
        assert_eq!(entry.summary(), "PLAN:START - --fast auth");
    }

    #[test]
    fn test_summary_includes_phase() {
        let entry = LogEntry::new("build", EventKind::PhaseStart).with_phase("green");
        assert_eq!(entry.summary(), "BUILD:GREEN:PHASE_START -");
    }

    #[test]
    fn test_summary_agent_descriptor_wins() {
        let entry = LogEntry::new("ship", EventKind::Milestone)
            .with_agent(AgentRef {
                agent_type: "code-reviewer".to_string(),
                id: "agent-1".to_string(),
                parent_cmd: "ship".to_string(),
            })
            .with_data("task", json!("review diff"))
            .with_data("description", json!("ignored"));
        assert_eq!(entry.summary(), "SHIP:MILESTONE - code-reviewer: review diff");
    }

    #[test]
    fn test_agent_spawn_without_descriptor() {
        let entry = LogEntry::new("ship", EventKind::AgentSpawn).with_data("agent_type", json!("test-runner"));
        assert_eq!(entry.summary(), "SHIP:AGENT_SPAWN - test-runner");
    }

    #[test]
    fn test_checklist_passed_count() {
        let checklist = LawChecklist {
            law1_tdd: true,
            law2_behavior_tests: true,
            law4_feature_branch: true,
            ..Default::default()
        };
        assert_eq!(checklist.passed_count(), 3);
    }

    #[test]
    fn test_entry_json_field_names() {
        let entry = LogEntry::new("ideate", EventKind::Complete).with_checklist(LawChecklist::default());
        let value = serde_json::to_value(&entry).unwrap();

        assert!(value.get("ts").is_some());
        assert!(value.get("cmd").is_some());
        assert!(value.get("ironLaws").is_some());
        assert!(value.get("phase").is_none());
        assert!(value.get("agent").is_none());
    }

    #[test]
    fn test_cmd_is_lowercased() {
        let entry = LogEntry::new("IDEATE", EventKind::Start);
        assert_eq!(entry.cmd, "ideate");
    }
}
