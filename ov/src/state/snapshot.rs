//! Workflow state snapshot
//!
//! A persisted cache of what the log already proves: which command is
//! running, how far the chain has progressed, and what should come next.
//! The snapshot can always be rebuilt from the log alone.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::CANONICAL_CHAIN;
use crate::wlog::{EventKind, LogEntry};

use super::atomic::{load_json_opt, write_json_atomic};

/// How many recent milestone timestamps the snapshot retains
const MILESTONE_WINDOW: usize = 20;

/// Progress stage of a single chain command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStage {
    #[default]
    Pending,
    Active,
    // Older producers wrote "done" for finished commands
    #[serde(alias = "done")]
    Complete,
}

/// Cursor pair consumed by the status-line feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusLine {
    #[serde(rename = "currentCommand")]
    pub current_command: String,
    #[serde(rename = "nextCommand")]
    pub next_command: String,
}

/// Cached workflow state, derived from the log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSnapshot {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub current_command: Option<String>,
    pub current_phase: Option<String>,
    pub chain: BTreeMap<String, ChainStage>,
    pub recent_milestones: Vec<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub next_command: Option<String>,
    pub statusline: StatusLine,
}

impl Default for WorkflowSnapshot {
    fn default() -> Self {
        let chain = CANONICAL_CHAIN
            .iter()
            .map(|cmd| (cmd.to_string(), ChainStage::Pending))
            .collect();
        Self {
            version: "1.0".to_string(),
            updated_at: Utc::now(),
            current_command: None,
            current_phase: None,
            chain,
            recent_milestones: Vec::new(),
            last_activity: None,
            next_command: CANONICAL_CHAIN.first().map(|c| c.to_string()),
            statusline: StatusLine::default(),
        }
    }
}

impl WorkflowSnapshot {
    /// Fold one log entry into the snapshot
    pub fn apply(&mut self, entry: &LogEntry) {
        debug!(cmd = %entry.cmd, event = %entry.event, "snapshot: apply");
        self.last_activity = Some(entry.ts);
        self.updated_at = entry.ts;

        match entry.event {
            EventKind::Start => {
                self.current_command = Some(entry.cmd.clone());
                self.current_phase = None;
                let stage = self.chain.entry(entry.cmd.clone()).or_default();
                if *stage != ChainStage::Complete {
                    *stage = ChainStage::Active;
                }
            }
            EventKind::PhaseStart => {
                self.current_phase = entry.phase.clone();
            }
            EventKind::PhaseComplete => {
                self.current_phase = None;
            }
            EventKind::Milestone => {
                self.recent_milestones.push(entry.ts);
                let overflow = self.recent_milestones.len().saturating_sub(MILESTONE_WINDOW);
                if overflow > 0 {
                    self.recent_milestones.drain(..overflow);
                }
            }
            EventKind::Complete => {
                self.chain.insert(entry.cmd.clone(), ChainStage::Complete);
                if self.current_command.as_deref() == Some(entry.cmd.as_str()) {
                    self.current_command = None;
                    self.current_phase = None;
                }
            }
            // A failed command stays active; the analyzer surfaces the issue
            EventKind::Failed => {}
            EventKind::AgentSpawn | EventKind::AgentComplete | EventKind::IronLawCheck => {}
        }

        self.next_command = self.suggest_next();
        self.statusline = StatusLine {
            current_command: self.current_command.clone().unwrap_or_default(),
            next_command: self.next_command.clone().unwrap_or_default(),
        };
    }

    /// First canonical command that has not completed yet
    fn suggest_next(&self) -> Option<String> {
        CANONICAL_CHAIN
            .iter()
            .find(|cmd| self.chain.get(**cmd).copied().unwrap_or_default() != ChainStage::Complete)
            .map(|cmd| cmd.to_string())
    }

    /// Rebuild the snapshot from a full ordered entry list
    pub fn rebuild(entries: &[LogEntry]) -> Self {
        debug!(count = entries.len(), "snapshot: rebuilding from log");
        let mut snapshot = Self::default();
        for entry in entries {
            snapshot.apply(entry);
        }
        snapshot
    }

    /// Load the snapshot cache, or `None` when missing/malformed
    pub fn load(path: &Path) -> Option<Self> {
        load_json_opt(path)
    }

    /// Persist the snapshot atomically
    pub fn save(&self, path: &Path) -> eyre::Result<()> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wlog::LogEntry;
    use tempfile::TempDir;

    fn entry(cmd: &str, event: EventKind) -> LogEntry {
        LogEntry::new(cmd, event)
    }

    #[test]
    fn test_default_chain_is_pending() {
        let snapshot = WorkflowSnapshot::default();
        assert!(snapshot.chain.values().all(|s| *s == ChainStage::Pending));
        assert_eq!(snapshot.next_command.as_deref(), Some("ideate"));
    }

    #[test]
    fn test_start_marks_active() {
        let mut snapshot = WorkflowSnapshot::default();
        snapshot.apply(&entry("ideate", EventKind::Start));

        assert_eq!(snapshot.chain["ideate"], ChainStage::Active);
        assert_eq!(snapshot.current_command.as_deref(), Some("ideate"));
        assert_eq!(snapshot.statusline.current_command, "ideate");
    }

    #[test]
    fn test_complete_advances_next_command() {
        let mut snapshot = WorkflowSnapshot::default();
        snapshot.apply(&entry("ideate", EventKind::Start));
        snapshot.apply(&entry("ideate", EventKind::Complete));

        assert_eq!(snapshot.chain["ideate"], ChainStage::Complete);
        assert_eq!(snapshot.next_command.as_deref(), Some("plan"));
        assert_eq!(snapshot.statusline.next_command, "plan");
        assert!(snapshot.current_command.is_none());
    }

    #[test]
    fn test_failed_leaves_command_active() {
        let mut snapshot = WorkflowSnapshot::default();
        snapshot.apply(&entry("plan", EventKind::Start));
        snapshot.apply(&entry("plan", EventKind::Failed));

        assert_eq!(snapshot.chain["plan"], ChainStage::Active);
    }

    #[test]
    fn test_milestone_window_is_bounded() {
        let mut snapshot = WorkflowSnapshot::default();
        for _ in 0..30 {
            snapshot.apply(&entry("build", EventKind::Milestone));
        }
        assert_eq!(snapshot.recent_milestones.len(), MILESTONE_WINDOW);
    }

    #[test]
    fn test_phase_tracking() {
        let mut snapshot = WorkflowSnapshot::default();
        let mut e = entry("build", EventKind::PhaseStart);
        e.phase = Some("GREEN".to_string());
        snapshot.apply(&e);
        assert_eq!(snapshot.current_phase.as_deref(), Some("GREEN"));

        snapshot.apply(&entry("build", EventKind::PhaseComplete));
        assert!(snapshot.current_phase.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("workflow-state.json");

        let mut snapshot = WorkflowSnapshot::default();
        snapshot.apply(&entry("ideate", EventKind::Start));
        snapshot.save(&path).unwrap();

        let loaded = WorkflowSnapshot::load(&path).unwrap();
        assert_eq!(loaded.chain["ideate"], ChainStage::Active);
        assert_eq!(loaded.version, "1.0");
    }

    #[test]
    fn test_load_accepts_done_alias() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("workflow-state.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","chain":{"ideate":"done","plan":"active"}}"#,
        )
        .unwrap();

        let loaded = WorkflowSnapshot::load(&path).unwrap();
        assert_eq!(loaded.chain["ideate"], ChainStage::Complete);
        assert_eq!(loaded.chain["plan"], ChainStage::Active);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let entries = vec![
            entry("ideate", EventKind::Start),
            entry("ideate", EventKind::Complete),
            entry("plan", EventKind::Start),
        ];

        let rebuilt = WorkflowSnapshot::rebuild(&entries);
        assert_eq!(rebuilt.chain["ideate"], ChainStage::Complete);
        assert_eq!(rebuilt.chain["plan"], ChainStage::Active);
        assert_eq!(rebuilt.next_command.as_deref(), Some("plan"));
    }
}
