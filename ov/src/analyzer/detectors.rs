//! Issue detectors
//!
//! Each detector runs independently over the full entry list. They take an
//! explicit `now` where ages matter, so results are deterministic.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::wlog::{EventKind, LogEntry};

use super::{AnalyzerConfig, CANONICAL_CHAIN, Issue, IssueKind, canonical_index};

/// Tool name carried by a milestone, from payload or description text
fn milestone_tool(entry: &LogEntry) -> Option<String> {
    if entry.event != EventKind::Milestone {
        return None;
    }
    if let Some(tool) = entry.data_str("tool") {
        return Some(tool.to_string());
    }
    let description = entry.data_str("description")?;
    let rest = description.strip_prefix("Tool:")?.trim_start();
    let tool: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if tool.is_empty() { None } else { Some(tool) }
}

/// Scale confidence linearly from `base` toward `base + span` as the
/// overshoot past `threshold` grows.
fn scaled_confidence(base: f64, span: f64, overshoot_secs: i64, threshold_secs: i64) -> f64 {
    let saturation = (3 * threshold_secs).max(1) as f64;
    base + span * (overshoot_secs as f64 / saturation).clamp(0.0, 1.0)
}

/// Same tool driving N+ consecutive milestones inside the rolling window
pub fn loop_detected(entries: &[LogEntry], config: &AnalyzerConfig) -> Option<Issue> {
    let window_start = entries.len().saturating_sub(config.loop_window);

    let mut best: Option<(String, usize, Vec<usize>)> = None;
    let mut run: Option<(String, usize, Vec<usize>)> = None;

    for (idx, entry) in entries.iter().enumerate().skip(window_start) {
        let Some(tool) = milestone_tool(entry) else {
            if entry.event == EventKind::Milestone {
                run = None;
            }
            continue;
        };

        match &mut run {
            Some((current, count, refs)) if *current == tool => {
                *count += 1;
                refs.push(idx);
            }
            _ => run = Some((tool, 1, vec![idx])),
        }

        if let Some((_, count, _)) = &run
            && best.as_ref().is_none_or(|(_, best_count, _)| count > best_count)
        {
            best = run.clone();
        }
    }

    let (tool, count, refs) = best?;
    if count < config.loop_repeat_threshold {
        return None;
    }

    let confidence = (0.55 + 0.03 * count as f64).min(0.95);
    Some(
        Issue::new(IssueKind::LoopDetected, confidence)
            .with_context("tool_name", json!(tool))
            .with_context("repeat_count", json!(count))
            .with_refs(refs),
    )
}

/// Every FAILED event is an issue
pub fn explicit_failure(entries: &[LogEntry]) -> Vec<Issue> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event == EventKind::Failed)
        .map(|(idx, entry)| {
            let error = entry.data_str("error").unwrap_or_default();
            let looks_like_tests = error.to_lowercase().contains("test")
                || entry.data.contains_key("tests_failed")
                || entry.data_str("kind") == Some("test_failure");

            let mut issue = Issue::new(IssueKind::ExplicitFailure, 0.95)
                .with_context("cmd", json!(entry.cmd))
                .with_refs(vec![idx]);
            if !error.is_empty() {
                issue = issue.with_context("error", json!(error));
            }
            if looks_like_tests {
                issue = issue.with_context("test_failure", json!(true));
            }
            issue
        })
        .collect()
}

/// An outstanding phase with no progress events past the threshold
pub fn phase_stuck(entries: &[LogEntry], now: DateTime<Utc>, config: &AnalyzerConfig) -> Option<Issue> {
    let (start_idx, start_entry) = entries
        .iter()
        .enumerate()
        .rev()
        .find(|(_, e)| e.event == EventKind::PhaseStart)?;

    // Phase closed afterwards: not outstanding
    let closed = entries[start_idx + 1..].iter().any(|e| {
        matches!(e.event, EventKind::PhaseComplete | EventKind::Complete | EventKind::Failed) && e.cmd == start_entry.cmd
    });
    if closed {
        return None;
    }

    let last_progress = entries[start_idx..]
        .iter()
        .filter(|e| matches!(e.event, EventKind::Milestone | EventKind::AgentComplete))
        .map(|e| e.ts)
        .max()
        .unwrap_or(start_entry.ts);

    let stalled = (now - last_progress).num_seconds();
    if stalled <= config.phase_stuck_secs {
        return None;
    }

    let confidence = scaled_confidence(0.75, 0.15, stalled - config.phase_stuck_secs, config.phase_stuck_secs);
    Some(
        Issue::new(IssueKind::PhaseStuck, confidence)
            .with_context("cmd", json!(start_entry.cmd))
            .with_context("phase", json!(start_entry.phase.clone().unwrap_or_default()))
            .with_context("stalled_secs", json!(stalled))
            .with_refs(vec![start_idx]),
    )
}

/// Commands started but never terminated as of the end of the list
fn open_commands(entries: &[LogEntry]) -> Vec<(usize, &LogEntry)> {
    let mut open: Vec<(usize, &LogEntry)> = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match entry.event {
            EventKind::Start => open.push((idx, entry)),
            EventKind::Complete | EventKind::Failed => {
                open.retain(|(_, started)| started.cmd != entry.cmd);
            }
            _ => {}
        }
    }
    open
}

/// Nothing logged at all for too long while a command is underway
pub fn silence(entries: &[LogEntry], now: DateTime<Utc>, config: &AnalyzerConfig) -> Option<Issue> {
    let last = entries.last()?;
    if open_commands(entries).is_empty() {
        return None;
    }

    let quiet = (now - last.ts).num_seconds();
    if quiet <= config.silence_secs {
        return None;
    }

    let confidence = scaled_confidence(0.70, 0.15, quiet - config.silence_secs, config.silence_secs);
    Some(
        Issue::new(IssueKind::Silence, confidence)
            .with_context("quiet_secs", json!(quiet))
            .with_context("last_event", json!(last.event.to_string()))
            .with_refs(vec![entries.len() - 1]),
    )
}

/// A green start with no red completion behind it
pub fn tdd_violation(entries: &[LogEntry]) -> Vec<Issue> {
    let mut issues = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        if entry.event != EventKind::Start || !entry.cmd.eq_ignore_ascii_case("green") {
            continue;
        }

        let feature = entry.data_str("feature");
        let red_done = entries[..idx].iter().any(|e| {
            e.cmd.eq_ignore_ascii_case("red")
                && e.event == EventKind::Complete
                && match (feature, e.data_str("feature")) {
                    (Some(want), Some(have)) => want == have,
                    _ => true,
                }
        });

        if !red_done {
            let mut issue = Issue::new(IssueKind::TddViolation, 0.90)
                .with_context("cmd", json!("green"))
                .with_refs(vec![idx]);
            if let Some(feature) = feature {
                issue = issue.with_context("feature", json!(feature));
            }
            issues.push(issue);
        }
    }

    issues
}

/// A canonical command started while an earlier one is not complete
pub fn out_of_order(entries: &[LogEntry]) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut completed: HashSet<usize> = HashSet::new();

    for (idx, entry) in entries.iter().enumerate() {
        let Some(position) = canonical_index(&entry.cmd) else {
            continue;
        };

        match entry.event {
            EventKind::Complete => {
                completed.insert(position);
            }
            EventKind::Start => {
                let first_incomplete = (0..position).find(|p| !completed.contains(p));
                if let Some(expected) = first_incomplete {
                    issues.push(
                        Issue::new(IssueKind::OutOfOrder, 0.80)
                            .with_context("cmd", json!(entry.cmd))
                            .with_context("expected", json!(CANONICAL_CHAIN[expected]))
                            .with_refs(vec![idx]),
                    );
                }
            }
            _ => {}
        }
    }

    issues
}

/// Milestone names a command must log before completing
const EXPECTED_MILESTONES: [(&str, &[&str]); 2] = [
    ("ideate", &["problem_definition", "solution_design", "approach_selected"]),
    ("plan", &["context_gathering", "task_breakdown", "sequencing"]),
];

/// Agent spawns a ship completion must be preceded by
const SHIP_EXPECTED_SPAWNS: usize = 4;

fn milestone_name(entry: &LogEntry) -> Option<&str> {
    entry.data_str("name").or_else(|| entry.data_str("description"))
}

/// Commands that completed without their expected milestones
pub fn missing_milestones(entries: &[LogEntry]) -> Vec<Issue> {
    let mut issues = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        if entry.event != EventKind::Complete {
            continue;
        }

        if let Some((_, expected)) = EXPECTED_MILESTONES.iter().find(|(cmd, _)| entry.cmd.eq_ignore_ascii_case(cmd)) {
            let seen: HashSet<&str> = entries[..idx]
                .iter()
                .filter(|e| e.cmd == entry.cmd && e.event == EventKind::Milestone)
                .filter_map(milestone_name)
                .collect();

            let missing: Vec<&str> = expected.iter().filter(|m| !seen.contains(**m)).copied().collect();
            if !missing.is_empty() {
                let confidence = 0.5 + 0.25 * (missing.len() as f64 / expected.len() as f64);
                issues.push(
                    Issue::new(IssueKind::MissingMilestones, confidence)
                        .with_context("cmd", json!(entry.cmd))
                        .with_context("missing", json!(missing))
                        .with_refs(vec![idx]),
                );
            }
        }

        if entry.cmd.eq_ignore_ascii_case("ship") {
            let spawns = entries[..idx]
                .iter()
                .filter(|e| e.cmd == entry.cmd && e.event == EventKind::AgentSpawn)
                .count();
            let gates = entries[..idx]
                .iter()
                .filter(|e| e.cmd == entry.cmd && e.event == EventKind::Milestone)
                .filter_map(milestone_name)
                .filter(|name| name.contains("gate"))
                .count();

            if spawns < SHIP_EXPECTED_SPAWNS || gates == 0 {
                let spawn_deficit = (SHIP_EXPECTED_SPAWNS.saturating_sub(spawns)) as f64 / SHIP_EXPECTED_SPAWNS as f64;
                let gate_deficit = if gates == 0 { 1.0 } else { 0.0 };
                let confidence = 0.5 + 0.25 * (spawn_deficit + gate_deficit) / 2.0;
                issues.push(
                    Issue::new(IssueKind::MissingMilestones, confidence)
                        .with_context("cmd", json!("ship"))
                        .with_context("agent_spawns", json!(spawns))
                        .with_context("gate_milestones", json!(gates))
                        .with_refs(vec![idx]),
                );
            }
        }
    }

    issues
}

/// A command left open with no activity at all past the threshold
pub fn abrupt_stop(entries: &[LogEntry], now: DateTime<Utc>, config: &AnalyzerConfig) -> Option<Issue> {
    let open = open_commands(entries);
    let (idx, entry) = *open.last()?;

    let idle = (now - entries.last()?.ts).num_seconds();
    if idle <= config.abrupt_stop_secs {
        return None;
    }

    Some(
        Issue::new(IssueKind::AbruptStop, 0.85)
            .with_context("cmd", json!(entry.cmd))
            .with_context("idle_secs", json!(idle))
            .with_refs(vec![idx]),
    )
}

/// Spawned agents that went quiet without completing
pub fn abandoned_agent(entries: &[LogEntry], now: DateTime<Utc>, config: &AnalyzerConfig) -> Vec<Issue> {
    struct AgentTrace {
        spawn_idx: usize,
        agent_type: String,
        last_seen: DateTime<Utc>,
        completed: bool,
    }

    let mut agents: HashMap<String, AgentTrace> = HashMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        let Some(agent) = &entry.agent else { continue };

        let trace = agents.entry(agent.id.clone()).or_insert_with(|| AgentTrace {
            spawn_idx: idx,
            agent_type: agent.agent_type.clone(),
            last_seen: entry.ts,
            completed: false,
        });
        trace.last_seen = entry.ts;
        if entry.event == EventKind::AgentComplete {
            trace.completed = true;
        }
    }

    let mut issues: Vec<Issue> = agents
        .into_iter()
        .filter(|(_, trace)| !trace.completed)
        .filter(|(_, trace)| (now - trace.last_seen).num_seconds() > config.abandoned_agent_secs)
        .map(|(id, trace)| {
            Issue::new(IssueKind::AbandonedAgent, 0.80)
                .with_context("agent_id", json!(id))
                .with_context("agent_type", json!(trace.agent_type))
                .with_refs(vec![trace.spawn_idx])
        })
        .collect();
    issues.sort_by_key(|i| i.entry_refs.first().copied());
    issues
}

/// Milestone rate in the last window under half of the prior window's
pub fn declining_velocity(entries: &[LogEntry], config: &AnalyzerConfig) -> Option<Issue> {
    let stamps: Vec<DateTime<Utc>> = entries
        .iter()
        .filter(|e| e.event == EventKind::Milestone)
        .map(|e| e.ts)
        .collect();

    let window = config.velocity_window;
    if stamps.len() < window * 2 {
        return None;
    }

    let recent = &stamps[stamps.len() - window..];
    let prior = &stamps[stamps.len() - window * 2..stamps.len() - window];

    let span = |slice: &[DateTime<Utc>]| ((*slice.last().unwrap() - *slice.first().unwrap()).num_seconds()).max(1);
    let recent_span = span(recent);
    let prior_span = span(prior);

    // Equal-count windows: half the rate means double the span
    if recent_span <= prior_span * 2 {
        return None;
    }

    Some(
        Issue::new(IssueKind::DecliningVelocity, 0.65)
            .with_context("recent_span_secs", json!(recent_span))
            .with_context("prior_span_secs", json!(prior_span)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn base() -> DateTime<Utc> {
        "2026-04-01T12:00:00Z".parse().unwrap()
    }

    fn at(secs: i64, cmd: &str, event: EventKind) -> LogEntry {
        let mut entry = LogEntry::new(cmd, event);
        entry.ts = base() + Duration::seconds(secs);
        entry
    }

    fn tool_milestone(secs: i64, tool: &str) -> LogEntry {
        at(secs, "build", EventKind::Milestone).with_data("description", json!(format!("Tool: {}", tool)))
    }

    #[test]
    fn test_loop_detected_from_descriptions() {
        let config = AnalyzerConfig::default();
        let entries: Vec<LogEntry> = (0..10).map(|i| tool_milestone(i, "Grep")).collect();

        let issue = loop_detected(&entries, &config).unwrap();
        assert_eq!(issue.kind, IssueKind::LoopDetected);
        assert_eq!(issue.context["tool_name"], "Grep");
        assert_eq!(issue.context["repeat_count"], 10);
        assert!((issue.confidence - 0.85).abs() < 1e-9);
        assert_eq!(issue.entry_refs.len(), 10);
    }

    #[test]
    fn test_loop_run_broken_by_different_tool() {
        let config = AnalyzerConfig::default();
        let mut entries = Vec::new();
        for i in 0..2 {
            entries.push(tool_milestone(i, "Grep"));
        }
        entries.push(tool_milestone(2, "Read"));
        for i in 3..5 {
            entries.push(tool_milestone(i, "Grep"));
        }

        assert!(loop_detected(&entries, &config).is_none());
    }

    #[test]
    fn test_loop_confidence_caps() {
        let config = AnalyzerConfig {
            loop_window: 40,
            ..Default::default()
        };
        let entries: Vec<LogEntry> = (0..30).map(|i| tool_milestone(i, "Bash")).collect();

        let issue = loop_detected(&entries, &config).unwrap();
        assert_eq!(issue.confidence, 0.95);
    }

    #[test]
    fn test_loop_window_excludes_old_entries() {
        let config = AnalyzerConfig::default();
        // Three early Greps fall outside the 20-entry window once padding lands
        let mut entries: Vec<LogEntry> = (0..3).map(|i| tool_milestone(i, "Grep")).collect();
        for i in 3..25 {
            entries.push(at(i, "build", EventKind::PhaseStart));
        }

        assert!(loop_detected(&entries, &config).is_none());
    }

    #[test]
    fn test_explicit_failure_and_test_context() {
        let entries = vec![
            at(0, "build", EventKind::Start),
            at(1, "build", EventKind::Failed).with_data("error", json!("3 tests failed in auth suite")),
        ];

        let issues = explicit_failure(&entries);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].confidence, 0.95);
        assert_eq!(issues[0].context["test_failure"], true);
        assert_eq!(issues[0].entry_refs, vec![1]);
    }

    #[test]
    fn test_explicit_failure_non_test() {
        let entries = vec![at(0, "ship", EventKind::Failed).with_data("error", json!("push rejected"))];
        let issues = explicit_failure(&entries);
        assert!(!issues[0].context.contains_key("test_failure"));
    }

    #[test]
    fn test_phase_stuck_fires_after_threshold() {
        let config = AnalyzerConfig::default();
        let entries = vec![
            at(0, "build", EventKind::Start),
            at(1, "build", EventKind::PhaseStart).with_phase("GREEN"),
        ];

        let now = base() + Duration::seconds(1 + 300);
        let issue = phase_stuck(&entries, now, &config).unwrap();
        assert_eq!(issue.kind, IssueKind::PhaseStuck);
        assert!(issue.confidence >= 0.75 && issue.confidence <= 0.90);
        assert_eq!(issue.context["phase"], "GREEN");
    }

    #[test]
    fn test_phase_stuck_respects_progress() {
        let config = AnalyzerConfig::default();
        let entries = vec![
            at(0, "build", EventKind::PhaseStart).with_phase("GREEN"),
            at(250, "build", EventKind::Milestone).with_data("description", json!("step")),
        ];

        // Only 100s since the milestone
        let now = base() + Duration::seconds(350);
        assert!(phase_stuck(&entries, now, &config).is_none());
    }

    #[test]
    fn test_phase_stuck_ignores_closed_phase() {
        let config = AnalyzerConfig::default();
        let entries = vec![
            at(0, "build", EventKind::PhaseStart).with_phase("GREEN"),
            at(10, "build", EventKind::PhaseComplete),
        ];
        let now = base() + Duration::seconds(1000);
        assert!(phase_stuck(&entries, now, &config).is_none());
    }

    #[test]
    fn test_silence_requires_open_command() {
        let config = AnalyzerConfig::default();
        let closed = vec![at(0, "plan", EventKind::Start), at(5, "plan", EventKind::Complete)];
        let now = base() + Duration::seconds(500);
        assert!(silence(&closed, now, &config).is_none());

        let open = vec![at(0, "plan", EventKind::Start)];
        let issue = silence(&open, now, &config).unwrap();
        assert!(issue.confidence >= 0.70 && issue.confidence <= 0.85);
        assert_eq!(issue.context["quiet_secs"], 500);
    }

    #[test]
    fn test_tdd_violation_without_red() {
        let entries = vec![
            at(0, "build", EventKind::Start),
            at(1, "build", EventKind::PhaseStart).with_phase("GREEN"),
            at(2, "green", EventKind::Start),
        ];

        let issues = tdd_violation(&entries);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].confidence, 0.90);
    }

    #[test]
    fn test_tdd_ok_after_red_complete() {
        let entries = vec![
            at(0, "red", EventKind::Start),
            at(1, "red", EventKind::Complete),
            at(2, "green", EventKind::Start),
        ];
        assert!(tdd_violation(&entries).is_empty());
    }

    #[test]
    fn test_tdd_matches_feature() {
        let entries = vec![
            at(0, "red", EventKind::Complete).with_data("feature", json!("cart")),
            at(1, "green", EventKind::Start).with_data("feature", json!("checkout")),
        ];
        assert_eq!(tdd_violation(&entries).len(), 1);
    }

    #[test]
    fn test_out_of_order_detects_skips() {
        let entries = vec![at(0, "green", EventKind::Start)];
        let issues = out_of_order(&entries);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].context["expected"], "ideate");
    }

    #[test]
    fn test_in_order_chain_is_clean() {
        let mut entries = Vec::new();
        let mut t = 0;
        for cmd in CANONICAL_CHAIN {
            entries.push(at(t, cmd, EventKind::Start));
            entries.push(at(t + 1, cmd, EventKind::Complete));
            t += 2;
        }
        assert!(out_of_order(&entries).is_empty());
    }

    #[test]
    fn test_missing_milestones_for_ideate() {
        let entries = vec![
            at(0, "ideate", EventKind::Start),
            at(1, "ideate", EventKind::Milestone).with_data("name", json!("problem_definition")),
            at(2, "ideate", EventKind::Complete),
        ];

        let issues = missing_milestones(&entries);
        assert_eq!(issues.len(), 1);
        let missing = issues[0].context["missing"].as_array().unwrap();
        assert_eq!(missing.len(), 2);
        assert!(issues[0].confidence < 0.90);
    }

    #[test]
    fn test_all_milestones_present_is_clean() {
        let entries = vec![
            at(0, "ideate", EventKind::Start),
            at(1, "ideate", EventKind::Milestone).with_data("name", json!("problem_definition")),
            at(2, "ideate", EventKind::Milestone).with_data("name", json!("solution_design")),
            at(3, "ideate", EventKind::Milestone).with_data("name", json!("approach_selected")),
            at(4, "ideate", EventKind::Complete),
        ];
        assert!(missing_milestones(&entries).is_empty());
    }

    #[test]
    fn test_ship_requires_spawns_and_gates() {
        let entries = vec![at(0, "ship", EventKind::Start), at(1, "ship", EventKind::Complete)];
        let issues = missing_milestones(&entries);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].context["agent_spawns"], 0);
    }

    #[test]
    fn test_abrupt_stop() {
        let config = AnalyzerConfig::default();
        let entries = vec![at(0, "build", EventKind::Start)];

        assert!(abrupt_stop(&entries, base() + Duration::seconds(200), &config).is_none());

        let issue = abrupt_stop(&entries, base() + Duration::seconds(400), &config).unwrap();
        assert_eq!(issue.confidence, 0.85);
        assert_eq!(issue.context["cmd"], "build");
    }

    #[test]
    fn test_abandoned_agent() {
        let config = AnalyzerConfig::default();
        let agent = crate::wlog::AgentRef {
            agent_type: "code-reviewer".to_string(),
            id: "agent-7".to_string(),
            parent_cmd: "ship".to_string(),
        };

        let entries = vec![at(0, "ship", EventKind::AgentSpawn).with_agent(agent.clone())];
        let issues = abandoned_agent(&entries, base() + Duration::seconds(200), &config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].context["agent_id"], "agent-7");

        // A completion clears it
        let entries = vec![
            at(0, "ship", EventKind::AgentSpawn).with_agent(agent.clone()),
            at(10, "ship", EventKind::AgentComplete).with_agent(agent),
        ];
        assert!(abandoned_agent(&entries, base() + Duration::seconds(500), &config).is_empty());
    }

    #[test]
    fn test_declining_velocity() {
        let config = AnalyzerConfig::default();

        // First 10 milestones a second apart, next 10 thirty seconds apart
        let mut entries = Vec::new();
        for i in 0..10 {
            entries.push(tool_milestone(i, "Edit"));
        }
        for i in 0..10 {
            entries.push(at(100 + i * 30, "build", EventKind::Milestone).with_data("name", json!(format!("s{}", i))));
        }

        let issue = declining_velocity(&entries, &config).unwrap();
        assert_eq!(issue.confidence, 0.65);

        // Too few milestones: silent
        assert!(declining_velocity(&entries[..12], &config).is_none());
    }
}
