//! Rule engine for free-form log text
//!
//! A fixed, ordered set of regex rules mapping raw output to typed
//! anomalies. Loop detection always runs first: a tool invoked often
//! enough in one buffer outranks whatever else the buffer matches.

use regex::{Captures, Regex, RegexBuilder};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::queue::Priority;

/// Default number of same-tool invocations that counts as a loop
pub const DEFAULT_LOOP_THRESHOLD: usize = 5;

/// A rule hit on a text buffer
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// Name of the rule that fired
    pub rule: &'static str,
    /// Anomaly kind for downstream tasks
    pub anomaly: &'static str,
    pub priority: Priority,
    /// Extracted evidence (tool name, file, seconds, message…)
    pub context: Map<String, Value>,
    /// Agent suggested to handle the follow-up
    pub suggested_agent: &'static str,
    /// Remediation prompt for the queued task
    pub prompt: String,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    anomaly: &'static str,
    priority: Priority,
    agent: &'static str,
    extract: fn(&Captures, &mut Map<String, Value>),
}

fn regex(pattern: &str, case_insensitive: bool) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .expect("rule pattern is valid")
}

fn capture_str(caps: &Captures, group: usize, key: &str, out: &mut Map<String, Value>) {
    if let Some(m) = caps.get(group) {
        out.insert(key.to_string(), json!(m.as_str().trim()));
    }
}

fn extract_file(caps: &Captures, out: &mut Map<String, Value>) {
    capture_str(caps, 1, "file", out);
}

fn extract_message(caps: &Captures, out: &mut Map<String, Value>) {
    capture_str(caps, 1, "message", out);
}

fn extract_seconds(caps: &Captures, out: &mut Map<String, Value>) {
    if let Some(secs) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
        out.insert("seconds".to_string(), json!(secs));
    }
}

fn extract_nothing(_caps: &Captures, _out: &mut Map<String, Value>) {}

fn extract_stack(caps: &Captures, out: &mut Map<String, Value>) {
    capture_str(caps, 1, "message", out);
    capture_str(caps, 2, "file", out);
    if let Some(line) = caps.get(3).and_then(|m| m.as_str().parse::<u64>().ok()) {
        out.insert("line".to_string(), json!(line));
    }
}

fn rule_set() -> Vec<Rule> {
    vec![
        Rule {
            name: "test_failure_fail",
            pattern: regex(r"FAIL\s+(\S+\.test\.[tj]sx?)", true),
            anomaly: "test_failure",
            priority: Priority::High,
            agent: "debugger",
            extract: extract_file,
        },
        Rule {
            name: "test_failure_vitest",
            pattern: regex(r"❯\s+(\S+\.test\.[tj]sx?)\s+\([^)]*\d+\s+failed", false),
            anomaly: "test_failure",
            priority: Priority::High,
            agent: "debugger",
            extract: extract_file,
        },
        Rule {
            name: "test_failure_generic",
            pattern: regex(r"Test failed:?\s*(.+)", true),
            anomaly: "test_failure",
            priority: Priority::High,
            agent: "debugger",
            extract: extract_message,
        },
        Rule {
            name: "agent_stuck_timeout",
            pattern: regex(r"(?:Command\s+)?timed?\s*out\s+(?:after\s+)?(\d+)", true),
            anomaly: "agent_stuck",
            priority: Priority::High,
            agent: "debugger",
            extract: extract_seconds,
        },
        Rule {
            name: "agent_stuck_no_output",
            pattern: regex(r"no\s+output\s+(?:received\s+)?(?:for\s+)?(\d+)\s*(?:seconds?|s)", true),
            anomaly: "agent_stuck",
            priority: Priority::High,
            agent: "debugger",
            extract: extract_seconds,
        },
        Rule {
            name: "ci_failure_emoji",
            pattern: regex(r"❌\s*(?:CI|Build|Pipeline)[:\s]+(.+)", true),
            anomaly: "ci_failure",
            priority: Priority::High,
            agent: "deployment-engineer",
            extract: extract_message,
        },
        Rule {
            name: "ci_failure_text",
            pattern: regex(r"(?:CI|build)\s+failed", true),
            anomaly: "ci_failure",
            priority: Priority::High,
            agent: "deployment-engineer",
            extract: extract_nothing,
        },
        Rule {
            name: "pr_check_failed",
            pattern: regex(r"PR\s+check\s+failed", true),
            anomaly: "pr_check_failed",
            priority: Priority::High,
            agent: "deployment-engineer",
            extract: extract_nothing,
        },
        Rule {
            name: "push_failed",
            pattern: regex(r"(?:error:\s*)?failed\s+to\s+push", true),
            anomaly: "push_failed",
            priority: Priority::High,
            agent: "deployment-engineer",
            extract: extract_nothing,
        },
        Rule {
            name: "exception_with_stack",
            pattern: regex(
                r"(?:TypeError|ReferenceError|SyntaxError|RangeError):\s*(.+?)(?:\n\s+at\s+\S+\s+\(([^:]+):(\d+))",
                false,
            ),
            anomaly: "exception",
            priority: Priority::Medium,
            agent: "debugger",
            extract: extract_stack,
        },
        Rule {
            name: "error_generic",
            pattern: regex(r"(?:TypeError|ReferenceError|SyntaxError|RangeError|Error):\s*(.+)", true),
            anomaly: "exception",
            priority: Priority::Medium,
            agent: "debugger",
            extract: extract_message,
        },
    ]
}

/// Remediation prompt for a fired rule
fn build_prompt(anomaly: &str, context: &Map<String, Value>) -> String {
    let detail = |key: &str| context.get(key).and_then(Value::as_str).map(str::to_string);
    match anomaly {
        "test_failure" => match detail("file").or_else(|| detail("message")) {
            Some(what) => format!("Tests are failing ({}). Investigate the failures and fix them.", what),
            None => "Tests are failing. Investigate the failures and fix them.".to_string(),
        },
        "agent_stuck" => {
            let secs = context.get("seconds").and_then(Value::as_u64);
            match secs {
                Some(s) => format!(
                    "An agent produced no progress for {} seconds. Find where it is stuck and unblock it.",
                    s
                ),
                None => "An agent appears stuck. Find where it is stuck and unblock it.".to_string(),
            }
        }
        "ci_failure" => "The CI pipeline failed. Inspect the pipeline output and repair the build.".to_string(),
        "pr_check_failed" => "A pull request check failed. Review the check output and fix the branch.".to_string(),
        "push_failed" => "A git push was rejected. Resolve the rejection and push again.".to_string(),
        "exception" => match (detail("message"), detail("file")) {
            (Some(msg), Some(file)) => format!("An exception was thrown in {}: {}. Fix the root cause.", file, msg),
            (Some(msg), None) => format!("An exception was thrown: {}. Fix the root cause.", msg),
            _ => "An exception was thrown. Fix the root cause.".to_string(),
        },
        _ => "Investigate the reported anomaly and remediate it.".to_string(),
    }
}

/// Ordered rule scanner with loop detection first
pub struct RuleEngine {
    rules: Vec<Rule>,
    tool_pattern: Regex,
    loop_threshold: usize,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Engine with the standard rule set and loop threshold
    pub fn new() -> Self {
        Self {
            rules: rule_set(),
            tool_pattern: regex(r"Tool:\s*(\w+)", false),
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
        }
    }

    /// Override the loop threshold
    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_threshold = threshold;
        self
    }

    /// Names of the configured rules, in scan order
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Scan a text buffer; returns the first match or `None`
    pub fn scan(&self, input: &str) -> Option<RuleMatch> {
        if input.is_empty() {
            return None;
        }

        if let Some(hit) = self.detect_loop(input) {
            return Some(hit);
        }

        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(input) {
                let mut context = Map::new();
                (rule.extract)(&caps, &mut context);
                let prompt = build_prompt(rule.anomaly, &context);
                debug!(rule = rule.name, "rule engine: matched");
                return Some(RuleMatch {
                    rule: rule.name,
                    anomaly: rule.anomaly,
                    priority: rule.priority,
                    context,
                    suggested_agent: rule.agent,
                    prompt,
                });
            }
        }

        None
    }

    /// Count `Tool: X` occurrences; the busiest tool at or past the
    /// threshold is reported as a loop regardless of other rule matches.
    fn detect_loop(&self, input: &str) -> Option<RuleMatch> {
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for caps in self.tool_pattern.captures_iter(input) {
            if let Some(tool) = caps.get(1) {
                *counts.entry(tool.as_str()).or_insert(0) += 1;
            }
        }

        let (tool, count) = counts.into_iter().max_by_key(|(_, count)| *count)?;
        if count < self.loop_threshold {
            return None;
        }

        debug!(tool, count, "rule engine: loop detected");
        let mut context = Map::new();
        context.insert("tool_name".to_string(), json!(tool));
        context.insert("repeat_count".to_string(), json!(count));
        let prompt = format!(
            "The {} tool has been invoked {} times in a row without progress. Diagnose why the agent is looping and unblock it.",
            tool, count
        );
        Some(RuleMatch {
            rule: "agent_loop",
            anomaly: "agent_loop",
            priority: Priority::High,
            context,
            suggested_agent: "debugger",
            prompt,
        })
    }
}
