//! Point-in-time health checks
//!
//! Each check is an independent function over filesystem and log state.
//! They never mutate anything; the aggregate report is the product.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use walkdir::WalkDir;

use crate::state::OssPaths;
use crate::wlog::{EventKind, read_all};

/// Extension → agent expected to handle that kind of file
pub const DELEGATION_HINTS: [(&str, &str); 7] = [
    (".ts", "typescript-pro"),
    (".tsx", "typescript-pro"),
    (".py", "python-pro"),
    (".go", "golang-pro"),
    (".java", "java-pro"),
    (".swift", "ios-developer"),
    (".dart", "flutter-expert"),
];

/// Session log staleness cutoff
const LOG_STALE_MINS: i64 = 5;
/// PROGRESS.md staleness cutoff
const PROGRESS_STALE_MINS: i64 = 60;
/// Notification recency cutoff
const NOTIFY_STALE_MINS: i64 = 30;

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Aggregate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

/// One diagnostic result
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Pass,
            message: message.into(),
            details: None,
        }
    }

    fn warn(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Warn,
            message: message.into(),
            details: None,
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: CheckStatus::Fail,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Full diagnostic report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub generated_at: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    /// Any fail ⇒ critical, else any warn ⇒ warning, else healthy
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        debug!(count = checks.len(), "HealthReport::from_checks: called");
        let overall_status = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            debug!("HealthReport::from_checks: fail present, critical branch");
            OverallStatus::Critical
        } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
            debug!("HealthReport::from_checks: warn present, warning branch");
            OverallStatus::Warning
        } else {
            debug!("HealthReport::from_checks: healthy branch");
            OverallStatus::Healthy
        };

        debug!(?overall_status, "HealthReport::from_checks: returning");
        Self {
            overall_status,
            generated_at: Utc::now(),
            checks,
        }
    }
}

/// Everything the checks need to look at
#[derive(Debug, Clone)]
pub struct HealthContext {
    pub project_root: PathBuf,
    pub paths: OssPaths,
    /// Whether a workflow session is currently underway
    pub session_active: bool,
    pub now: DateTime<Utc>,
}

impl HealthContext {
    pub fn new(project_root: impl Into<PathBuf>, session_active: bool) -> Self {
        let project_root = project_root.into();
        debug!(?project_root, session_active, "HealthContext::new: called");
        let paths = OssPaths::new(&project_root);
        Self {
            project_root,
            paths,
            session_active,
            now: Utc::now(),
        }
    }
}

/// Run every check and aggregate
pub fn run_all(ctx: &HealthContext) -> HealthReport {
    debug!(project = %ctx.project_root.display(), "run_all: called");
    HealthReport::from_checks(vec![
        check_logging(ctx),
        check_dev_docs(ctx),
        check_delegation(ctx),
        check_archive(ctx),
        check_notifications(ctx),
        check_queue(ctx),
        check_quality_gates(ctx),
        check_git_safety(ctx),
    ])
}

fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    debug!(path = %path.display(), "mtime: called");
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn minutes_old(path: &Path, now: DateTime<Utc>) -> Option<i64> {
    debug!(path = %path.display(), "minutes_old: called");
    let result = mtime(path).map(|m| (now - m).num_minutes());
    debug!(?result, "minutes_old: returning");
    result
}

/// Session log present, fresh, and carrying structured entries
pub fn check_logging(ctx: &HealthContext) -> CheckResult {
    debug!("check_logging: called");
    let log = ctx.paths.workflow_log();
    if !log.exists() {
        debug!("check_logging: missing log branch");
        return CheckResult::fail("logging", "No workflow log found");
    }

    if ctx.session_active
        && let Some(age) = minutes_old(&log, ctx.now)
        && age > LOG_STALE_MINS
    {
        debug!(age, "check_logging: stale log branch");
        return CheckResult::warn("logging", format!("Workflow log stale ({} min old)", age));
    }

    let entries = read_all(&log);
    if entries.is_empty() {
        debug!("check_logging: no structured entries branch");
        return CheckResult::warn("logging", "Workflow log has no structured entries");
    }

    debug!(count = entries.len(), "check_logging: pass branch");
    CheckResult::pass("logging", format!("{} entries logged", entries.len()))
}

/// Required planning docs exist and PROGRESS.md moves during a session
pub fn check_dev_docs(ctx: &HealthContext) -> CheckResult {
    debug!("check_dev_docs: called");
    let plan = ctx.project_root.join("PLAN.md");
    let progress = ctx.project_root.join("PROGRESS.md");

    let mut missing = Vec::new();
    if !plan.exists() {
        debug!("check_dev_docs: PLAN.md missing");
        missing.push("PLAN.md");
    }
    if !progress.exists() {
        debug!("check_dev_docs: PROGRESS.md missing");
        missing.push("PROGRESS.md");
    }
    if !missing.is_empty() {
        debug!(?missing, "check_dev_docs: missing docs branch");
        return CheckResult::fail("dev_docs", format!("Missing docs: {}", missing.join(", ")));
    }

    if ctx.session_active
        && let Some(age) = minutes_old(&progress, ctx.now)
        && age > PROGRESS_STALE_MINS
    {
        debug!(age, "check_dev_docs: stale PROGRESS.md branch");
        return CheckResult::warn("dev_docs", format!("PROGRESS.md untouched for {} min", age));
    }

    debug!("check_dev_docs: pass branch");
    CheckResult::pass("dev_docs", "Planning docs present")
}

/// Specialized file types in play should mean delegated agents in the log
pub fn check_delegation(ctx: &HealthContext) -> CheckResult {
    debug!(session_active = ctx.session_active, "check_delegation: called");
    if !ctx.session_active {
        debug!("check_delegation: no active session branch");
        return CheckResult::pass("delegation", "No active session");
    }

    let entries = read_all(&ctx.paths.workflow_log());
    let has_agents = entries
        .iter()
        .any(|e| matches!(e.event, EventKind::AgentSpawn | EventKind::AgentComplete));
    debug!(has_agents, entries = entries.len(), "check_delegation: scanned log");

    // Extensions mentioned anywhere in milestone payloads
    let mut expected: Vec<&str> = Vec::new();
    for entry in &entries {
        for value in entry.data.values() {
            let Some(s) = value.as_str() else { continue };
            for (ext, agent) in DELEGATION_HINTS {
                if s.contains(ext) && !expected.contains(&agent) {
                    debug!(ext, agent, "check_delegation: specialized extension seen");
                    expected.push(agent);
                }
            }
        }
    }

    if !expected.is_empty() && !has_agents {
        debug!(?expected, "check_delegation: missing delegation branch");
        return CheckResult::warn(
            "delegation",
            "Specialized files touched without delegated agents",
        )
        .with_details(json!({ "expected_agents": expected }));
    }

    debug!("check_delegation: pass branch");
    CheckResult::pass("delegation", "Delegation looks consistent")
}

/// Completed feature directories still sitting under the active path
pub fn check_archive(ctx: &HealthContext) -> CheckResult {
    debug!("check_archive: called");
    let active_dir = ctx.project_root.join("dev-docs").join("active");
    if !active_dir.is_dir() {
        debug!("check_archive: no active directory branch");
        return CheckResult::pass("archive", "No active feature directory");
    }

    let mut finished: Vec<String> = Vec::new();
    for entry in WalkDir::new(&active_dir).min_depth(2).max_depth(2) {
        let Ok(entry) = entry else { continue };
        if entry.file_name() != "PROGRESS.md" {
            continue;
        }
        debug!(path = %entry.path().display(), "check_archive: inspecting feature progress");
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            debug!("check_archive: unreadable PROGRESS.md, skipping");
            continue;
        };
        let lower = content.to_lowercase();
        if lower.contains("status: complete") || lower.contains("phase: shipped") || lower.contains("all phases complete")
        {
            if let Some(feature) = entry.path().parent().and_then(|p| p.file_name()) {
                debug!(feature = %feature.to_string_lossy(), "check_archive: finished feature found");
                finished.push(feature.to_string_lossy().into_owned());
            }
        }
    }

    if finished.is_empty() {
        debug!("check_archive: pass branch");
        CheckResult::pass("archive", "No finished features awaiting archive")
    } else {
        debug!(count = finished.len(), "check_archive: unarchived features branch");
        CheckResult::warn("archive", format!("{} finished feature(s) not archived", finished.len()))
            .with_details(json!({ "features": finished }))
    }
}

/// Notifier binary reachable and recently used
pub fn check_notifications(ctx: &HealthContext) -> CheckResult {
    debug!("check_notifications: called");
    let notifier = ["terminal-notifier", "notify-send", "osascript"]
        .iter()
        .find(|bin| binary_on_path(bin));

    let Some(notifier) = notifier else {
        debug!("check_notifications: no notifier binary branch");
        return CheckResult::warn("notifications", "No notifier binary on PATH");
    };
    debug!(%notifier, "check_notifications: notifier found");

    if ctx.session_active {
        let stamp = ctx.paths.dir().join("last-notification");
        match minutes_old(&stamp, ctx.now) {
            Some(age) if age <= NOTIFY_STALE_MINS => {
                debug!(age, "check_notifications: recent notification branch");
            }
            _ => {
                debug!("check_notifications: stale notification branch");
                return CheckResult::warn(
                    "notifications",
                    format!("No notification delivered in the last {} min", NOTIFY_STALE_MINS),
                );
            }
        }
    }

    debug!("check_notifications: pass branch");
    CheckResult::pass("notifications", format!("Notifier available ({})", notifier))
}

fn binary_on_path(name: &str) -> bool {
    debug!(name, "binary_on_path: called");
    let Some(path_var) = std::env::var_os("PATH") else {
        debug!("binary_on_path: no PATH variable");
        return false;
    };
    let result = std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file());
    debug!(name, result, "binary_on_path: returning");
    result
}

/// Live queue file parses (missing is fine, it will be created)
pub fn check_queue(ctx: &HealthContext) -> CheckResult {
    debug!("check_queue: called");
    let queue = ctx.paths.queue_file();
    if !queue.exists() {
        debug!("check_queue: missing file branch");
        return CheckResult::pass("queue", "Queue not created yet");
    }
    match std::fs::read_to_string(&queue)
        .ok()
        .and_then(|c| serde_json::from_str::<Value>(&c).ok())
    {
        Some(_) => {
            debug!("check_queue: readable branch");
            CheckResult::pass("queue", "Queue file readable")
        }
        None => {
            debug!("check_queue: unreadable branch");
            CheckResult::warn("queue", "Queue file unreadable, will be rewritten")
        }
    }
}

/// Recent failed-task pileup suggests gates are being ignored
pub fn check_quality_gates(ctx: &HealthContext) -> CheckResult {
    debug!("check_quality_gates: called");
    let failed = ctx.paths.queue_failed_file();
    let count = std::fs::read_to_string(&failed)
        .ok()
        .and_then(|c| serde_json::from_str::<Value>(&c).ok())
        .and_then(|v| v.get("tasks").and_then(Value::as_array).map(Vec::len))
        .unwrap_or(0);
    debug!(count, "check_quality_gates: failed archive size");

    if count > 10 {
        debug!("check_quality_gates: pileup branch");
        CheckResult::warn("quality_gates", format!("{} failed tasks archived", count))
    } else {
        debug!("check_quality_gates: pass branch");
        CheckResult::pass("quality_gates", "No failed-task pileup")
    }
}

/// Active sessions should not commit straight to main
pub fn check_git_safety(ctx: &HealthContext) -> CheckResult {
    debug!("check_git_safety: called");
    let head = ctx.project_root.join(".git").join("HEAD");
    let Ok(content) = std::fs::read_to_string(&head) else {
        debug!("check_git_safety: not a repository branch");
        return CheckResult::pass("git_safety", "Not a git repository");
    };

    let on_main = content.trim() == "ref: refs/heads/main" || content.trim() == "ref: refs/heads/master";
    debug!(on_main, "check_git_safety: HEAD inspected");
    if ctx.session_active && on_main {
        debug!("check_git_safety: on main during session branch");
        CheckResult::warn("git_safety", "Session is working directly on the main branch")
    } else {
        debug!("check_git_safety: pass branch");
        CheckResult::pass("git_safety", "Branch discipline looks fine")
    }
}
