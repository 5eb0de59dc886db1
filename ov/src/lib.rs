//! Overseer - background supervisor for phased development workflows
//!
//! A surrounding toolchain drives an ideate → plan → build → ship workflow
//! and appends structured entries to a project-local log. Overseer tails
//! that log, reconstructs workflow state, detects anomalies, and reacts by
//! queueing prioritized remediation tasks and emitting notifications.
//!
//! # Modules
//!
//! - [`wlog`] - Append-only hybrid workflow log: writer, reader, tailer
//! - [`analyzer`] - Chain-progress reconstruction and issue detectors
//! - [`rules`] - Regex rule engine over free-form log text
//! - [`llm`] - Confidence-gated LLM fallback classifier
//! - [`intervention`] - Issue → notification + queue task mapping
//! - [`queue`] - Persistent priority task queue with archives
//! - [`compliance`] - Repeat-escalating workflow law monitor
//! - [`health`] - Point-in-time diagnostics
//! - [`supervisor`] - The orchestrator wiring it all together
//! - [`state`] - `.oss` paths and atomic persistent state files

pub mod analyzer;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod daemon;
pub mod health;
pub mod intervention;
pub mod llm;
pub mod queue;
pub mod rules;
pub mod state;
pub mod supervisor;
pub mod wlog;

// Re-export commonly used types
pub use analyzer::{Analysis, AnalyzerConfig, CANONICAL_CHAIN, Issue, IssueKind, WorkflowAnalyzer};
pub use compliance::{ComplianceMonitor, Law, MonitorMode};
pub use config::{RoutingConfig, Settings};
pub use daemon::{DaemonError, PidFile};
pub use health::{CheckResult, CheckStatus, HealthContext, HealthReport, OverallStatus};
pub use intervention::{Intervention, InterventionGenerator, Notification, NotifyPriority, ResponseKind};
pub use llm::{LlmAnalyzer, LlmAnalyzerConfig};
pub use queue::{Priority, QueueError, QueueManager, Task, TaskInput, TaskPatch, TaskStatus};
pub use rules::{RuleEngine, RuleMatch};
pub use state::{ChainStage, OssPaths, TddLock, UpdateState, WorkflowSnapshot};
pub use supervisor::Supervisor;
pub use wlog::{AgentRef, EntryFilter, EventKind, LawChecklist, LogEntry, LogTailer, LogWriter};
