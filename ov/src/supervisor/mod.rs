//! Supervisor orchestrator
//!
//! Wires the log tailer, analyzer, rule engine, LLM fallback, compliance
//! monitor, intervention generator, and queue together. Owns the PID file,
//! the chain-state snapshot, and the TDD semaphore; everything it knows it
//! learned from the log.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::analyzer::{Analysis, AnalyzerConfig, Issue, IssueKind, WorkflowAnalyzer};
use crate::compliance::{ComplianceMonitor, MonitorMode};
use crate::config::{RoutingConfig, Settings};
use crate::daemon::{DaemonError, PidFile};
use crate::health::{HealthContext, HealthReport};
use crate::intervention::{Intervention, InterventionGenerator, Notification, ResponseKind};
use crate::llm::{LlmAnalyzer, LlmAnalyzerConfig};
use crate::queue::{QueueManager, TaskInput};
use crate::rules::RuleEngine;
use crate::state::{OssPaths, TddLock, WorkflowSnapshot};
use crate::wlog::{EventKind, LogEntry, LogTailer, read_all};

/// Buffered free-form text size that triggers an LLM fallback pass
const LLM_BUFFER_THRESHOLD: usize = 800;

/// Pluggable notification sink
pub type Notifier = Arc<dyn Fn(&Notification) + Send + Sync>;

fn response_strength(kind: ResponseKind) -> u8 {
    match kind {
        ResponseKind::NotifyOnly => 0,
        ResponseKind::NotifySuggest => 1,
        ResponseKind::AutoRemediate => 2,
    }
}

/// The composed background supervisor for one project
pub struct Supervisor {
    paths: OssPaths,
    pid: PidFile,
    settings: Settings,
    rules: RuleEngine,
    analyzer: WorkflowAnalyzer,
    generator: InterventionGenerator,
    compliance: ComplianceMonitor,
    llm: Option<LlmAnalyzer>,
    queue: QueueManager,
    entries: Vec<LogEntry>,
    snapshot: WorkflowSnapshot,
    /// Strongest response already taken per issue identity
    seen_issues: HashMap<String, u8>,
    seen_rule_hits: std::collections::HashSet<String>,
    llm_buffer: String,
    /// Raw-log byte position the compliance scanner has consumed
    precheck_offset: u64,
    notifier: Option<Notifier>,
    started: bool,
}

impl Supervisor {
    /// Build a supervisor rooted at a project directory
    pub fn new(project_root: impl AsRef<Path>) -> Result<Self> {
        Self::with_settings(project_root, Settings::load())
    }

    /// Build with explicit settings (tests and embedding)
    pub fn with_settings(project_root: impl AsRef<Path>, settings: Settings) -> Result<Self> {
        let paths = OssPaths::new(project_root.as_ref());
        paths.ensure()?;
        debug!(project = %project_root.as_ref().display(), "Supervisor::new");

        let queue = QueueManager::open(&paths)
            .wrap_err("Failed to open task queue")?
            .with_max_size(settings.queue.max_size);

        let compliance = ComplianceMonitor::new(settings.compliance.mode)
            .with_interval(Duration::from_secs(settings.compliance.interval_secs.max(1)));

        let llm = build_llm_analyzer(&paths, &settings);

        Ok(Self {
            pid: PidFile::new(paths.pid_file()),
            paths,
            settings,
            rules: RuleEngine::new(),
            analyzer: WorkflowAnalyzer::new(AnalyzerConfig::default()),
            generator: InterventionGenerator::new(),
            compliance,
            llm,
            queue,
            entries: Vec::new(),
            snapshot: WorkflowSnapshot::default(),
            seen_issues: HashMap::new(),
            seen_rule_hits: std::collections::HashSet::new(),
            llm_buffer: String::new(),
            precheck_offset: 0,
            notifier: None,
            started: false,
        })
    }

    /// Install the notification callback
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Claim the project and rebuild state from the log
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when another supervisor
    /// holds the PID file.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        self.pid.acquire()?;

        // An hour-old red phase is an abandoned one
        TddLock::reap_if_stale(&self.paths.tdd_lock_file(), Utc::now());

        self.entries = read_all(&self.paths.workflow_log());
        self.snapshot = match WorkflowSnapshot::load(&self.paths.state_file()) {
            Some(snapshot) => snapshot,
            None => {
                info!("No snapshot cache, rebuilding from log");
                WorkflowSnapshot::rebuild(&self.entries)
            }
        };
        if let Err(e) = self.snapshot.save(&self.paths.state_file()) {
            warn!(error = %e, "Failed to persist snapshot at start");
        }

        // Pre-existing issues are baseline, not news
        let analysis = self.analyzer.analyze(&self.entries);
        for issue in &analysis.issues {
            self.seen_issues.insert(issue_key(issue), u8::MAX);
        }

        self.precheck_offset = std::fs::metadata(self.paths.workflow_log())
            .map(|m| m.len())
            .unwrap_or(0);

        self.started = true;
        info!(entries = self.entries.len(), "Supervisor started");
        Ok(())
    }

    /// Handle one new log entry end to end
    pub async fn process_entry(&mut self, entry: LogEntry) -> Result<()> {
        debug!(cmd = %entry.cmd, event = %entry.event, "supervisor: processing entry");

        // A fresh ideation marks a session boundary
        if entry.event == EventKind::Start && entry.cmd == "ideate" {
            self.compliance.reset();
        }

        self.snapshot.apply(&entry);
        if let Err(e) = self.snapshot.save(&self.paths.state_file()) {
            warn!(error = %e, "Failed to persist snapshot");
        }

        // Completion checklists feed the compliance streaks
        if matches!(entry.event, EventKind::Complete | EventKind::AgentComplete)
            && let Some(checklist) = entry.iron_laws
        {
            let tasks = self.compliance.observe_checklist(&checklist);
            for task in tasks {
                self.enqueue(task);
            }
        }

        let free_text = entry_text(&entry);
        self.entries.push(entry);

        let analysis = self.analyzer.analyze(&self.entries);
        self.act_on_issues(&analysis);

        self.scan_free_text(&free_text).await;
        Ok(())
    }

    /// Re-run the analyzer without a new entry (time-based detectors)
    pub fn reanalyze(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let analysis = self.analyzer.analyze(&self.entries);
        self.act_on_issues(&analysis);
    }

    /// Scan the raw log tail for compliance pre-check blocks
    pub fn compliance_sweep(&mut self) {
        if self.compliance.mode() == MonitorMode::WorkflowOnly && self.snapshot.current_command.is_none() {
            debug!("compliance: no active command, skipping sweep");
            return;
        }

        let log = self.paths.workflow_log();
        let size = std::fs::metadata(&log).map(|m| m.len()).unwrap_or(0);
        if size < self.precheck_offset {
            self.precheck_offset = 0;
        }
        if size == self.precheck_offset {
            return;
        }

        let Ok(content) = std::fs::read_to_string(&log) else {
            return;
        };
        // The offset normally lands on a line boundary; if a torn write put
        // it mid-character, fall back to scanning nothing this tick.
        let tail = content.get(self.precheck_offset as usize..).unwrap_or("");
        self.precheck_offset = size;

        let tasks = self.compliance.scan_precheck_text(tail);
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Run until shutdown: tail the log, tick the compliance timer
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<Self> {
        let (entry_tx, mut entry_rx) = mpsc::unbounded_channel();
        let mut tailer = LogTailer::new(self.paths.workflow_log());
        tailer.start(move |entry| {
            let _ = entry_tx.send(entry);
        });

        let mut compliance_tick = tokio::time::interval(self.compliance.interval());
        compliance_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Supervisor loop running");
        loop {
            tokio::select! {
                Some(entry) = entry_rx.recv() => {
                    if let Err(e) = self.process_entry(entry).await {
                        warn!(error = %e, "Failed to process log entry");
                    }
                }
                _ = compliance_tick.tick() => {
                    self.compliance_sweep();
                    self.reanalyze();
                }
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        tailer.stop().await;
        self.stop();
        Ok(self)
    }

    /// Final persist and release; completes well under a second
    pub fn stop(&mut self) {
        if let Err(e) = self.snapshot.save(&self.paths.state_file()) {
            warn!(error = %e, "Failed to persist snapshot on stop");
        }
        if self.started {
            self.pid.release();
            self.started = false;
        }
        info!("Supervisor stopped");
    }

    /// Point-in-time health report for this project
    pub fn health_report(&self) -> HealthReport {
        let ctx = HealthContext::new(
            self.paths.dir().parent().unwrap_or(self.paths.dir()),
            self.snapshot.current_command.is_some(),
        );
        crate::health::run_all(&ctx)
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut QueueManager {
        &mut self.queue
    }

    pub fn snapshot(&self) -> &WorkflowSnapshot {
        &self.snapshot
    }

    pub fn compliance_mut(&mut self) -> &mut ComplianceMonitor {
        &mut self.compliance
    }

    fn act_on_issues(&mut self, analysis: &Analysis) {
        for issue in &analysis.issues {
            let key = issue_key(issue);
            let intervention = self.generator.generate(issue);
            let strength = response_strength(intervention.response);

            let previous = self.seen_issues.get(&key).copied();
            if previous.is_some_and(|p| p >= strength) {
                continue;
            }
            self.seen_issues.insert(key, strength);
            self.dispatch(issue, intervention);
        }
    }

    fn dispatch(&mut self, issue: &Issue, intervention: Intervention) {
        debug!(kind = %issue.kind, response = ?intervention.response, "supervisor: dispatching intervention");
        self.notify(&intervention.notification);

        let Some(task) = intervention.task else { return };

        // A deliberate red phase suppresses test-failure remediation
        if issue.kind == IssueKind::ExplicitFailure
            && issue.context.get("test_failure").and_then(|v| v.as_bool()) == Some(true)
            && TddLock::is_present(&self.paths.tdd_lock_file())
        {
            info!("TDD mode active, skipping test-failure enqueue");
            return;
        }

        self.enqueue(task);
    }

    async fn scan_free_text(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        if let Some(hit) = self.rules.scan(text) {
            let key = format!("{}|{}", hit.rule, serde_json::Value::Object(hit.context.clone()));
            if !self.seen_rule_hits.insert(key) {
                return;
            }

            if hit.anomaly == "test_failure" && TddLock::is_present(&self.paths.tdd_lock_file()) {
                info!("TDD mode active, skipping test-failure enqueue");
                return;
            }

            self.enqueue(TaskInput {
                priority: hit.priority,
                source: "log_monitor".to_string(),
                anomaly_type: hit.anomaly.to_string(),
                prompt: hit.prompt,
                suggested_agent: hit.suggested_agent.to_string(),
                context: hit.context,
            });
            return;
        }

        // Rules missed: accumulate for the LLM fallback
        let Some(llm) = &self.llm else { return };
        self.llm_buffer.push_str(text);
        self.llm_buffer.push('\n');
        if self.llm_buffer.len() < LLM_BUFFER_THRESHOLD {
            return;
        }

        let window = std::mem::take(&mut self.llm_buffer);
        if let Some(task) = llm.classify(&window).await {
            self.enqueue(task);
        }
    }

    fn enqueue(&mut self, task: TaskInput) {
        match self.queue.add(task) {
            Ok(task) => debug!(id = %task.id, "supervisor: task queued"),
            Err(e) => warn!(error = %e, "Failed to queue task"),
        }
    }

    fn notify(&self, notification: &Notification) {
        if !self.settings.notifications.enabled {
            return;
        }
        let Some(notifier) = &self.notifier else { return };

        if self.settings.notifications.sound {
            notifier(notification);
        } else {
            let mut muted = notification.clone();
            muted.sound = None;
            notifier(&muted);
        }

        // Recency stamp consulted by the notifications health check
        let _ = std::fs::write(self.paths.dir().join("last-notification"), notification.title.as_bytes());
    }
}

/// Stable identity for an issue across repeated analysis passes
fn issue_key(issue: &Issue) -> String {
    let anchor = issue
        .entry_refs
        .first()
        .map(|idx| idx.to_string())
        .unwrap_or_else(|| "-".to_string());
    let subject = ["tool_name", "agent_id", "law", "cmd"]
        .iter()
        .find_map(|k| issue.context.get(*k).and_then(|v| v.as_str()))
        .unwrap_or_default();
    format!("{}|{}|{}", issue.kind, anchor, subject)
}

/// Free-form text carried by an entry's payload
fn entry_text(entry: &LogEntry) -> String {
    entry
        .data
        .values()
        .filter_map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_llm_analyzer(paths: &OssPaths, settings: &Settings) -> Option<LlmAnalyzer> {
    if !settings.llm_fallback.enabled {
        return None;
    }

    let routing = RoutingConfig::load(paths);
    let mut config = LlmAnalyzerConfig {
        api_key: routing.api_key("openrouter").map(str::to_string),
        ..Default::default()
    };
    if let Some(model) = &settings.llm_fallback.model {
        config.model = model.clone();
    }
    if let Some(base_url) = &settings.llm_fallback.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(floor) = settings.llm_fallback.confidence_floor {
        config.confidence_floor = floor;
    }

    if config.api_key.is_none() {
        warn!("LLM fallback enabled but no openrouter API key configured");
        return None;
    }
    Some(LlmAnalyzer::new(config))
}
