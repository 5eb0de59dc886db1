//! Compliance monitor
//!
//! Tracks repeat violations of the six workflow laws. First offense is
//! forgiven, the second queues a low-priority nudge, the third and beyond
//! escalate hard. Passing a law resets its streak; history is forever.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::queue::{Priority, TaskInput};
use crate::wlog::{LAW_LABELS, LawChecklist};

/// Default compliance scan cadence
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Directive embedded into escalated prompts
pub const REFETCH_DIRECTIVE: &str =
    "Fetch the canonical IRON LAWS document and re-read all six laws before doing anything else.";

/// The six workflow laws
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Law {
    Law1Tdd,
    Law2BehaviorTests,
    Law3NoLoops,
    Law4FeatureBranch,
    Law5Delegation,
    Law6DocsSynced,
}

impl Law {
    pub const ALL: [Law; 6] = [
        Law::Law1Tdd,
        Law::Law2BehaviorTests,
        Law::Law3NoLoops,
        Law::Law4FeatureBranch,
        Law::Law5Delegation,
        Law::Law6DocsSynced,
    ];

    /// 1-based law number
    pub fn number(&self) -> u8 {
        match self {
            Self::Law1Tdd => 1,
            Self::Law2BehaviorTests => 2,
            Self::Law3NoLoops => 3,
            Self::Law4FeatureBranch => 4,
            Self::Law5Delegation => 5,
            Self::Law6DocsSynced => 6,
        }
    }

    /// Checklist field name (`law4_feature_branch`)
    pub fn key(&self) -> &'static str {
        LAW_LABELS[self.number() as usize - 1].0
    }

    /// Human label
    pub fn label(&self) -> &'static str {
        LAW_LABELS[self.number() as usize - 1].1
    }

    pub fn from_number(n: u8) -> Option<Self> {
        debug!(n, "Law::from_number: called");
        if !(1..=6).contains(&n) {
            debug!(n, "Law::from_number: out of range branch");
            return None;
        }
        Self::ALL.get(n as usize - 1).copied()
    }
}

impl std::fmt::Display for Law {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LAW #{}", self.number())
    }
}

/// One recorded failure of a law
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Per-law streak and history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LawState {
    /// Successive unresolved violations; a pass resets this to zero
    pub active_count: u32,
    /// Every failure ever recorded; never reset
    pub history: Vec<ViolationRecord>,
}

/// When the monitor runs its scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorMode {
    #[default]
    Always,
    WorkflowOnly,
}

/// Stateful, repeat-escalating checker of the six laws
pub struct ComplianceMonitor {
    states: BTreeMap<Law, LawState>,
    mode: MonitorMode,
    interval: Duration,
    precheck_line: Regex,
    hint_line: Regex,
}

impl Default for ComplianceMonitor {
    fn default() -> Self {
        Self::new(MonitorMode::default())
    }
}

impl ComplianceMonitor {
    pub fn new(mode: MonitorMode) -> Self {
        debug!(?mode, "ComplianceMonitor::new: called");
        Self {
            states: Law::ALL.iter().map(|law| (*law, LawState::default())).collect(),
            mode,
            interval: DEFAULT_SCAN_INTERVAL,
            precheck_line: Regex::new(r"^\[([✓✗])\]\s*LAW\s*#(\d)\s*:\s*(.*)$").expect("valid pattern"),
            hint_line: Regex::new(r"^→\s*(.*)$").expect("valid pattern"),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        debug!(?interval, "ComplianceMonitor::with_interval: called");
        self.interval = interval;
        self
    }

    pub fn mode(&self) -> MonitorMode {
        debug!(?self.mode, "ComplianceMonitor::mode: called");
        self.mode
    }

    pub fn interval(&self) -> Duration {
        debug!(?self.interval, "ComplianceMonitor::interval: called");
        self.interval
    }

    /// Record a failure; returns the new active count
    pub fn record_violation(&mut self, law: Law, message: impl Into<String>) -> u32 {
        let message = message.into();
        debug!(%law, %message, "ComplianceMonitor::record_violation: called");
        let state = self.states.entry(law).or_default();
        state.active_count += 1;
        state.history.push(ViolationRecord {
            at: Utc::now(),
            message: message.clone(),
        });

        info!(%law, count = state.active_count, %message, "Compliance violation recorded");
        debug!(count = state.active_count, "ComplianceMonitor::record_violation: returning");
        state.active_count
    }

    /// Record a pass; clears the streak, keeps the history
    pub fn record_pass(&mut self, law: Law) {
        debug!(%law, "ComplianceMonitor::record_pass: called");
        let state = self.states.entry(law).or_default();
        if state.active_count > 0 {
            debug!(%law, was = state.active_count, "ComplianceMonitor::record_pass: clearing streak");
        }
        state.active_count = 0;
    }

    pub fn active_count(&self, law: Law) -> u32 {
        debug!(%law, "ComplianceMonitor::active_count: called");
        let result = self.states.get(&law).map(|s| s.active_count).unwrap_or(0);
        debug!(result, "ComplianceMonitor::active_count: returning");
        result
    }

    pub fn history(&self, law: Law) -> &[ViolationRecord] {
        debug!(%law, "ComplianceMonitor::history: called");
        self.states.get(&law).map(|s| s.history.as_slice()).unwrap_or(&[])
    }

    /// Session boundary: forgive every streak, forget nothing
    pub fn reset(&mut self) {
        debug!("ComplianceMonitor::reset: called");
        for state in self.states.values_mut() {
            state.active_count = 0;
        }
        info!("Compliance streaks reset");
    }

    /// Escalating task for the law's current streak
    ///
    /// First offense returns `None`; the second a low-priority nudge; from
    /// the third on, a high-priority task whose prompt demands a re-read of
    /// the laws document.
    pub fn create_intervention_task(&self, law: Law, message: &str, hint: Option<&str>) -> Option<TaskInput> {
        debug!(%law, %message, ?hint, "ComplianceMonitor::create_intervention_task: called");
        let count = self.active_count(law);
        if count <= 1 {
            debug!(count, "ComplianceMonitor::create_intervention_task: first offense branch, returning None");
            return None;
        }

        let mut context = serde_json::Map::new();
        context.insert("law".to_string(), json!(law.key()));
        context.insert("law_number".to_string(), json!(law.number()));
        context.insert("violation_count".to_string(), json!(count));
        context.insert("message".to_string(), json!(message));
        if let Some(hint) = hint {
            context.insert("hint".to_string(), json!(hint));
        }

        let (priority, anomaly, prompt) = if count == 2 {
            debug!("ComplianceMonitor::create_intervention_task: second offense branch, low priority");
            (
                Priority::Low,
                "iron_law_violation",
                format!(
                    "{} ({}) was violated again: {}. Correct course before continuing.",
                    law,
                    law.label(),
                    message
                ),
            )
        } else {
            debug!(count, "ComplianceMonitor::create_intervention_task: repeated offense branch, escalating");
            (
                Priority::High,
                "iron_law_repeated",
                format!(
                    "{} ({}) has now been violated {} times in a row: {}. {}",
                    law,
                    law.label(),
                    count,
                    message,
                    REFETCH_DIRECTIVE
                ),
            )
        };

        debug!(%priority, anomaly, "ComplianceMonitor::create_intervention_task: returning task");
        Some(TaskInput {
            priority,
            source: "compliance_monitor".to_string(),
            anomaly_type: anomaly.to_string(),
            prompt,
            suggested_agent: "workflow-coach".to_string(),
            context,
        })
    }

    /// Fold a completion checklist in; returns any escalation tasks
    pub fn observe_checklist(&mut self, checklist: &LawChecklist) -> Vec<TaskInput> {
        debug!(passed = checklist.passed_count(), "ComplianceMonitor::observe_checklist: called");
        let mut tasks = Vec::new();
        for (law, passed) in Law::ALL.iter().zip(checklist.verdicts()) {
            if passed {
                debug!(law = %law, "ComplianceMonitor::observe_checklist: pass branch");
                self.record_pass(*law);
            } else {
                debug!(law = %law, "ComplianceMonitor::observe_checklist: violation branch");
                let message = format!("{} not observed at completion", law.label());
                self.record_violation(*law, &message);
                tasks.extend(self.create_intervention_task(*law, &message, None));
            }
        }
        debug!(tasks = tasks.len(), "ComplianceMonitor::observe_checklist: returning");
        tasks
    }

    /// Scan raw text for pre-check blocks; returns any escalation tasks
    ///
    /// The block format is `IRON LAW PRE-CHECK` followed by one
    /// `[✓|✗] LAW #n: <text>` line per check, each optionally continued by
    /// a `→ <hint>` line. Leading `#` comment markers are tolerated.
    pub fn scan_precheck_text(&mut self, text: &str) -> Vec<TaskInput> {
        debug!(bytes = text.len(), "ComplianceMonitor::scan_precheck_text: called");
        let mut tasks = Vec::new();
        let mut in_block = false;
        // Failure waiting for a possible hint continuation line
        let mut pending: Option<(Law, String)> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim_start_matches('#').trim();

            if line.contains("IRON LAW PRE-CHECK") {
                debug!("ComplianceMonitor::scan_precheck_text: block header branch");
                in_block = true;
                continue;
            }
            if !in_block {
                continue;
            }

            if let Some(caps) = self.hint_line.captures(line) {
                debug!("ComplianceMonitor::scan_precheck_text: hint line branch");
                if let Some((law, message)) = pending.take() {
                    let hint = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                    debug!(%law, %hint, "ComplianceMonitor::scan_precheck_text: attaching hint to pending failure");
                    tasks.extend(self.create_intervention_task(law, &message, Some(&hint)));
                }
                continue;
            }

            // A pending failure with no hint line still escalates
            if let Some((law, message)) = pending.take() {
                debug!(%law, "ComplianceMonitor::scan_precheck_text: pending failure without hint branch");
                tasks.extend(self.create_intervention_task(law, &message, None));
            }

            let Some(caps) = self.precheck_line.captures(line) else {
                // End of block once non-check content appears
                if !line.is_empty() {
                    debug!("ComplianceMonitor::scan_precheck_text: end of block branch");
                    in_block = false;
                }
                continue;
            };

            let passed = &caps[1] == "✓";
            let Some(law) = caps[2].parse::<u8>().ok().and_then(Law::from_number) else {
                debug!("ComplianceMonitor::scan_precheck_text: unknown law number branch");
                continue;
            };
            let message = caps[3].trim().to_string();

            if passed {
                debug!(%law, "ComplianceMonitor::scan_precheck_text: pass line branch");
                self.record_pass(law);
            } else {
                debug!(%law, %message, "ComplianceMonitor::scan_precheck_text: failure line branch");
                self.record_violation(law, &message);
                pending = Some((law, message));
            }
        }

        if let Some((law, message)) = pending.take() {
            debug!(%law, "ComplianceMonitor::scan_precheck_text: trailing pending failure branch");
            tasks.extend(self.create_intervention_task(law, &message, None));
        }

        debug!(tasks = tasks.len(), "ComplianceMonitor::scan_precheck_text: returning");
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_law_numbering_and_keys() {
        assert_eq!(Law::Law4FeatureBranch.number(), 4);
        assert_eq!(Law::Law4FeatureBranch.key(), "law4_feature_branch");
        assert_eq!(Law::from_number(1), Some(Law::Law1Tdd));
        assert_eq!(Law::from_number(7), None);
        assert_eq!(Law::from_number(0), None);
    }

    #[test]
    fn test_escalation_sequence() {
        let mut monitor = ComplianceMonitor::default();

        monitor.record_violation(Law::Law4FeatureBranch, "On main branch");
        assert!(
            monitor
                .create_intervention_task(Law::Law4FeatureBranch, "On main branch", None)
                .is_none()
        );

        monitor.record_violation(Law::Law4FeatureBranch, "Still on main");
        let second = monitor
            .create_intervention_task(Law::Law4FeatureBranch, "Still on main", None)
            .unwrap();
        assert_eq!(second.priority, Priority::Low);
        assert_eq!(second.anomaly_type, "iron_law_violation");

        monitor.record_violation(Law::Law4FeatureBranch, "Still on main again");
        let third = monitor
            .create_intervention_task(Law::Law4FeatureBranch, "Still on main again", None)
            .unwrap();
        assert_eq!(third.priority, Priority::High);
        assert_eq!(third.anomaly_type, "iron_law_repeated");
        assert!(third.prompt.contains(REFETCH_DIRECTIVE));
    }

    #[test]
    fn test_pass_resets_streak_but_keeps_history() {
        let mut monitor = ComplianceMonitor::default();

        monitor.record_violation(Law::Law1Tdd, "no failing test");
        monitor.record_violation(Law::Law1Tdd, "still no failing test");
        assert_eq!(monitor.active_count(Law::Law1Tdd), 2);
        assert_eq!(monitor.history(Law::Law1Tdd).len(), 2);

        monitor.record_pass(Law::Law1Tdd);
        assert_eq!(monitor.active_count(Law::Law1Tdd), 0);
        assert_eq!(monitor.history(Law::Law1Tdd).len(), 2);

        // Streak restarts from scratch
        monitor.record_violation(Law::Law1Tdd, "again");
        assert!(monitor.create_intervention_task(Law::Law1Tdd, "again", None).is_none());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut monitor = ComplianceMonitor::default();
        monitor.record_violation(Law::Law2BehaviorTests, "implementation-coupled test");

        monitor.reset();
        let counts: Vec<u32> = Law::ALL.iter().map(|l| monitor.active_count(*l)).collect();
        let history_len = monitor.history(Law::Law2BehaviorTests).len();

        monitor.reset();
        assert_eq!(counts, Law::ALL.iter().map(|l| monitor.active_count(*l)).collect::<Vec<_>>());
        assert_eq!(history_len, monitor.history(Law::Law2BehaviorTests).len());
        assert_eq!(history_len, 1);
    }

    #[test]
    fn test_scan_precheck_block() {
        let mut monitor = ComplianceMonitor::default();
        let block = "IRON LAW PRE-CHECK\n[✓] LAW #1: failing test exists\n[✗] LAW #4: On main branch\n→ git switch -c feature/x\n";

        // First offense: recorded, no task
        let tasks = monitor.scan_precheck_text(block);
        assert!(tasks.is_empty());
        assert_eq!(monitor.active_count(Law::Law4FeatureBranch), 1);
        assert_eq!(monitor.active_count(Law::Law1Tdd), 0);

        // Second offense: low task with the hint attached
        let tasks = monitor.scan_precheck_text("IRON LAW PRE-CHECK\n[✗] LAW #4: Still on main\n→ switch branches\n");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, Priority::Low);
        assert_eq!(tasks[0].context["hint"], "switch branches");

        // Third offense: escalated
        let tasks = monitor.scan_precheck_text("IRON LAW PRE-CHECK\n[✗] LAW #4: Still on main again\n");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].anomaly_type, "iron_law_repeated");
        assert!(tasks[0].prompt.contains(REFETCH_DIRECTIVE));
    }

    #[test]
    fn test_scan_tolerates_comment_prefixes() {
        let mut monitor = ComplianceMonitor::default();
        let block = "# IRON LAW PRE-CHECK\n# [✗] LAW #5: no delegation\n";

        monitor.scan_precheck_text(block);
        assert_eq!(monitor.active_count(Law::Law5Delegation), 1);
    }

    #[test]
    fn test_scan_ignores_text_outside_blocks() {
        let mut monitor = ComplianceMonitor::default();
        monitor.scan_precheck_text("[✗] LAW #3: looping\n");
        assert_eq!(monitor.active_count(Law::Law3NoLoops), 0);
    }

    #[test]
    fn test_observe_checklist() {
        let mut monitor = ComplianceMonitor::default();
        let checklist = LawChecklist {
            law1_tdd: true,
            law2_behavior_tests: true,
            law3_no_loops: true,
            law4_feature_branch: false,
            law5_delegation: true,
            law6_docs_synced: true,
        };

        // First failure is forgiven, second produces a task
        assert!(monitor.observe_checklist(&checklist).is_empty());
        let tasks = monitor.observe_checklist(&checklist);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].context["law"], "law4_feature_branch");

        // A clean checklist resets the streak
        monitor.observe_checklist(&LawChecklist {
            law1_tdd: true,
            law2_behavior_tests: true,
            law3_no_loops: true,
            law4_feature_branch: true,
            law5_delegation: true,
            law6_docs_synced: true,
        });
        assert_eq!(monitor.active_count(Law::Law4FeatureBranch), 0);
        assert_eq!(monitor.history(Law::Law4FeatureBranch).len(), 2);
    }
}
