//! Task types and the queue file schema

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task priority; `Critical` drains first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Drain rank: critical < high < medium < low
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Why a task ended up in an archive file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveReason {
    Failed,
    Expired,
    Dropped,
}

/// A queued remediation task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub priority: Priority,
    /// Monitor that produced this task
    pub source: String,
    pub anomaly_type: String,
    pub prompt: String,
    pub suggested_agent: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_reason: Option<ArchiveReason>,
}

impl Task {
    /// Sort key: priority rank, then age (oldest first)
    pub fn sort_key(&self) -> (u8, DateTime<Utc>) {
        (self.priority.rank(), self.created_at)
    }
}

/// Everything a caller supplies to enqueue a task
#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub priority: Priority,
    pub source: String,
    pub anomaly_type: String,
    pub prompt: String,
    pub suggested_agent: String,
    pub context: Map<String, Value>,
}

impl TaskInput {
    /// Materialize into a pending task with a fresh id
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: generate_task_id(now),
            created_at: now,
            priority: self.priority,
            source: self.source,
            anomaly_type: self.anomaly_type,
            prompt: self.prompt,
            suggested_agent: self.suggested_agent,
            context: self.context,
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            completed_at: None,
            archived_at: None,
            archive_reason: None,
        }
    }
}

/// Partial update applied by [`QueueManager::update`]
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub attempts: Option<u32>,
    pub error: Option<String>,
}

impl TaskPatch {
    /// Patch that marks a task with a new status
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// On-disk shape shared by the live queue and both archives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueFile {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

impl Default for QueueFile {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            updated_at: Utc::now(),
            tasks: Vec::new(),
        }
    }
}

/// `task-YYYYMMDD-HHMMSS-xxxx` with a random hex suffix
pub fn generate_task_id(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::rng().random();
    format!("task-{}-{:04x}", now.format("%Y%m%d-%H%M%S"), suffix)
}
