//! Workflow analyzer
//!
//! Turns the ordered entry list into chain progress, a set of semantic
//! issues, and a health score. The analysis is a pure function of the
//! entries and the clock: same input, same issues.

mod chain;
mod detectors;

pub use chain::{CANONICAL_CHAIN, canonical_index, compute_chain};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::queue::Priority;
use crate::state::ChainStage;
use crate::wlog::LogEntry;

/// Semantic issue kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LoopDetected,
    ExplicitFailure,
    PhaseStuck,
    Silence,
    TddViolation,
    OutOfOrder,
    MissingMilestones,
    AbruptStop,
    AbandonedAgent,
    DecliningVelocity,
    Regression,
    IronLawViolation,
    IronLawRepeated,
    IronLawIgnored,
    SpecDriftStructural,
    SpecDriftCriteria,
}

impl IssueKind {
    /// Queue priority a task for this kind should carry
    pub fn priority(&self) -> Priority {
        match self {
            Self::Regression => Priority::Critical,
            Self::LoopDetected
            | Self::ExplicitFailure
            | Self::PhaseStuck
            | Self::TddViolation
            | Self::IronLawRepeated
            | Self::IronLawIgnored => Priority::High,
            Self::OutOfOrder
            | Self::MissingMilestones
            | Self::AbruptStop
            | Self::AbandonedAgent
            | Self::SpecDriftStructural
            | Self::SpecDriftCriteria => Priority::Medium,
            Self::Silence | Self::DecliningVelocity | Self::IronLawViolation => Priority::Low,
        }
    }

    /// Weight used by the health score
    fn weight(&self) -> f64 {
        match self {
            Self::LoopDetected => 15.0,
            Self::ExplicitFailure => 25.0,
            Self::PhaseStuck => 12.0,
            Self::Silence => 8.0,
            Self::TddViolation => 18.0,
            Self::OutOfOrder => 10.0,
            Self::MissingMilestones => 8.0,
            Self::AbruptStop => 15.0,
            Self::AbandonedAgent => 10.0,
            Self::DecliningVelocity => 6.0,
            Self::Regression => 20.0,
            Self::IronLawViolation => 10.0,
            Self::IronLawRepeated => 18.0,
            Self::IronLawIgnored => 20.0,
            Self::SpecDriftStructural => 12.0,
            Self::SpecDriftCriteria => 10.0,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).expect("kind serializes");
        write!(f, "{}", s.as_str().unwrap_or("anomaly"))
    }
}

/// One detected problem, with its evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Detector certainty in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Indices into the analyzed entry list
    #[serde(default)]
    pub entry_refs: Vec<usize>,
}

impl Issue {
    pub fn new(kind: IssueKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            context: Map::new(),
            entry_refs: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_refs(mut self, refs: Vec<usize>) -> Self {
        self.entry_refs = refs;
        self
    }
}

/// Result of one analysis pass
#[derive(Debug, Clone)]
pub struct Analysis {
    pub issues: Vec<Issue>,
    pub chain_progress: BTreeMap<String, ChainStage>,
    pub health_score: f64,
}

/// Detector thresholds; defaults match production behavior
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Consecutive same-tool milestones that count as a loop
    pub loop_repeat_threshold: usize,
    /// Rolling window (entries) the loop detector looks at
    pub loop_window: usize,
    pub phase_stuck_secs: i64,
    pub silence_secs: i64,
    pub abrupt_stop_secs: i64,
    pub abandoned_agent_secs: i64,
    /// Milestones per window for the velocity comparison
    pub velocity_window: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            loop_repeat_threshold: 3,
            loop_window: 20,
            phase_stuck_secs: 240,
            silence_secs: 90,
            abrupt_stop_secs: 300,
            abandoned_agent_secs: 120,
            velocity_window: 10,
        }
    }
}

/// The semantic reasoner over log entries
#[derive(Debug, Clone, Default)]
pub struct WorkflowAnalyzer {
    config: AnalyzerConfig,
}

impl WorkflowAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze against the current clock
    pub fn analyze(&self, entries: &[LogEntry]) -> Analysis {
        self.analyze_at(entries, Utc::now())
    }

    /// Analyze against an explicit clock (deterministic for tests)
    pub fn analyze_at(&self, entries: &[LogEntry], now: DateTime<Utc>) -> Analysis {
        debug!(count = entries.len(), "analyzer: running");
        let chain_progress = compute_chain(entries);

        let mut issues = Vec::new();
        issues.extend(detectors::loop_detected(entries, &self.config));
        issues.extend(detectors::explicit_failure(entries));
        issues.extend(detectors::phase_stuck(entries, now, &self.config));
        issues.extend(detectors::silence(entries, now, &self.config));
        issues.extend(detectors::tdd_violation(entries));
        issues.extend(detectors::out_of_order(entries));
        issues.extend(detectors::missing_milestones(entries));
        issues.extend(detectors::abrupt_stop(entries, now, &self.config));
        issues.extend(detectors::abandoned_agent(entries, now, &self.config));
        issues.extend(detectors::declining_velocity(entries, &self.config));

        let health_score = health_score(&issues);
        debug!(issues = issues.len(), health_score, "analyzer: done");

        Analysis {
            issues,
            chain_progress,
            health_score,
        }
    }
}

/// `100 − Σ weight × confidence`, clamped to [0, 100]
pub fn health_score(issues: &[Issue]) -> f64 {
    let penalty: f64 = issues.iter().map(|i| i.kind.weight() * i.confidence).sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&IssueKind::LoopDetected).unwrap(),
            "\"loop_detected\""
        );
        let kind: IssueKind = serde_json::from_str("\"iron_law_repeated\"").unwrap();
        assert_eq!(kind, IssueKind::IronLawRepeated);
    }

    #[test]
    fn test_issue_confidence_is_clamped() {
        assert_eq!(Issue::new(IssueKind::Silence, 1.7).confidence, 1.0);
        assert_eq!(Issue::new(IssueKind::Silence, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_health_score_empty_is_perfect() {
        assert_eq!(health_score(&[]), 100.0);
    }

    #[test]
    fn test_health_score_is_monotone_in_issue_count() {
        let one = vec![Issue::new(IssueKind::Silence, 0.8)];
        let two = vec![
            Issue::new(IssueKind::Silence, 0.8),
            Issue::new(IssueKind::LoopDetected, 0.9),
        ];
        assert!(health_score(&two) < health_score(&one));
        assert!(health_score(&one) < 100.0);
    }

    #[test]
    fn test_health_score_is_monotone_in_confidence() {
        let low = vec![Issue::new(IssueKind::ExplicitFailure, 0.5)];
        let high = vec![Issue::new(IssueKind::ExplicitFailure, 0.95)];
        assert!(health_score(&high) < health_score(&low));
    }

    #[test]
    fn test_health_score_clamps_at_zero() {
        let issues: Vec<Issue> = (0..20).map(|_| Issue::new(IssueKind::ExplicitFailure, 1.0)).collect();
        assert_eq!(health_score(&issues), 0.0);
    }

    #[test]
    fn test_kind_priorities() {
        assert_eq!(IssueKind::LoopDetected.priority(), Priority::High);
        assert_eq!(IssueKind::Regression.priority(), Priority::Critical);
        assert_eq!(IssueKind::IronLawViolation.priority(), Priority::Low);
        assert_eq!(IssueKind::IronLawRepeated.priority(), Priority::High);
    }
}
