//! Queue manager
//!
//! Single owner of the live queue and archive files. Every mutation
//! re-sorts, enforces the size cap, persists atomically, and then tells
//! the registered listeners what happened.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use chrono::Utc;
use eyre::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::state::{OssPaths, load_json_opt, write_json_atomic};

use super::task::{ArchiveReason, Priority, QueueFile, Task, TaskInput, TaskPatch, TaskStatus};

/// Default live-queue size cap
pub const DEFAULT_MAX_SIZE: usize = 50;

/// Queue operation errors surfaced to callers
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No task with id {0}")]
    NotFound(String),
}

/// Compact mutation event delivered to listeners
#[derive(Debug, Clone)]
pub struct QueueEvent {
    /// `task_added`, `task_updated`, `task_removed`, `task_failed`,
    /// `task_expired`, or `queue_cleared`
    pub event_type: &'static str,
    pub task: Option<Task>,
    pub queue_count: usize,
    pub message: String,
}

type Listener = Box<dyn Fn(&QueueEvent) + Send + Sync>;

/// Owner of `queue.json` and its archives
pub struct QueueManager {
    live_path: PathBuf,
    failed_path: PathBuf,
    expired_path: PathBuf,
    max_size: usize,
    tasks: Vec<Task>,
    listeners: Vec<Listener>,
}

impl QueueManager {
    /// Open the queue rooted at the project's `.oss` directory
    ///
    /// A missing live file is created empty; a malformed one is treated as
    /// absent and replaced on the next successful persist.
    pub fn open(paths: &OssPaths) -> Result<Self> {
        Self::open_at(paths.queue_file(), paths.queue_failed_file(), paths.queue_expired_file())
    }

    /// Open with explicit file locations
    pub fn open_at(live_path: PathBuf, failed_path: PathBuf, expired_path: PathBuf) -> Result<Self> {
        debug!(live = %live_path.display(), "QueueManager::open_at");

        let mut manager = Self {
            live_path,
            failed_path,
            expired_path,
            max_size: DEFAULT_MAX_SIZE,
            tasks: Vec::new(),
            listeners: Vec::new(),
        };

        match load_json_opt::<QueueFile>(&manager.live_path) {
            Some(file) => {
                manager.tasks = file.tasks;
                manager.sort();
                info!(count = manager.tasks.len(), "Loaded task queue");
            }
            None => {
                // Missing or malformed: start empty and write a valid file
                if !manager.live_path.exists() {
                    manager.persist()?;
                } else {
                    warn!("Queue file unreadable, starting empty");
                }
            }
        }

        Ok(manager)
    }

    /// Override the size cap
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Register a mutation listener
    ///
    /// A panicking listener is isolated; it never propagates to the caller
    /// performing the mutation.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Enqueue a new task; returns the stored task with its assigned id
    pub fn add(&mut self, input: TaskInput) -> Result<Task> {
        let task = input.into_task(Utc::now());
        info!(id = %task.id, priority = %task.priority, anomaly = %task.anomaly_type, "Queueing task");

        self.tasks.push(task.clone());
        self.sort();
        self.enforce_cap()?;
        self.persist()?;

        self.emit(QueueEvent {
            event_type: "task_added",
            task: Some(task.clone()),
            queue_count: self.tasks.len(),
            message: format!("Queued {} task for {}", task.priority, task.anomaly_type),
        });
        Ok(task)
    }

    /// Head of the pending queue, if any
    pub fn next_pending(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    /// Apply a patch to a task by id
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> Result<Task, QueueError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            // completed_at is stamped exactly once, on the first transition
            if status == TaskStatus::Completed && task.status != TaskStatus::Completed && task.completed_at.is_none() {
                task.completed_at = Some(Utc::now());
            }
            task.status = status;
        }
        if let Some(attempts) = patch.attempts {
            task.attempts = attempts;
        }
        if let Some(error) = patch.error {
            task.error = Some(error);
        }

        let updated = task.clone();
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist queue after update");
        }

        self.emit(QueueEvent {
            event_type: "task_updated",
            task: Some(updated.clone()),
            queue_count: self.tasks.len(),
            message: format!("Updated task {}", updated.id),
        });
        Ok(updated)
    }

    /// Remove a task from the live queue
    pub fn remove(&mut self, id: &str) -> Result<Task, QueueError> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let task = self.tasks.remove(idx);

        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist queue after remove");
        }

        self.emit(QueueEvent {
            event_type: "task_removed",
            task: Some(task.clone()),
            queue_count: self.tasks.len(),
            message: format!("Removed task {}", task.id),
        });
        Ok(task)
    }

    /// Drop every live task
    pub fn clear(&mut self) -> Result<()> {
        let dropped = self.tasks.len();
        self.tasks.clear();
        self.persist()?;

        info!(dropped, "Cleared task queue");
        self.emit(QueueEvent {
            event_type: "queue_cleared",
            task: None,
            queue_count: 0,
            message: format!("Cleared {} tasks", dropped),
        });
        Ok(())
    }

    /// Number of pending tasks
    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Pending).count()
    }

    /// Live task counts keyed by priority
    pub fn count_by_priority(&self) -> BTreeMap<Priority, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.priority).or_insert(0) += 1;
        }
        counts
    }

    /// All live tasks in drain order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Move a task to the failed archive
    pub fn move_to_failed(&mut self, id: &str, error: impl Into<String>) -> Result<Task, QueueError> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let mut task = self.tasks.remove(idx);

        task.status = TaskStatus::Failed;
        task.error = Some(error.into());
        let archive_path = self.failed_path.clone();
        self.archive(&archive_path, task.clone(), ArchiveReason::Failed);

        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist queue after move_to_failed");
        }

        self.emit(QueueEvent {
            event_type: "task_failed",
            task: Some(task.clone()),
            queue_count: self.tasks.len(),
            message: format!("Archived failed task {}", task.id),
        });
        Ok(task)
    }

    fn sort(&mut self) {
        self.tasks.sort_by_key(Task::sort_key);
    }

    /// Evict lowest-priority, oldest tasks past the cap into the expired archive
    fn enforce_cap(&mut self) -> Result<()> {
        while self.tasks.len() > self.max_size {
            let Some(victim_idx) = self.eviction_target() else {
                break;
            };
            let task = self.tasks.remove(victim_idx);
            info!(id = %task.id, "Queue over capacity, expiring task");
            let archive_path = self.expired_path.clone();
            self.archive(&archive_path, task.clone(), ArchiveReason::Expired);
            self.emit(QueueEvent {
                event_type: "task_expired",
                task: Some(task),
                queue_count: self.tasks.len(),
                message: "Queue over capacity".to_string(),
            });
        }
        Ok(())
    }

    /// Oldest task of the lowest priority present
    fn eviction_target(&self) -> Option<usize> {
        let lowest = self.tasks.iter().map(|t| t.priority.rank()).max()?;
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.priority.rank() == lowest)
            .min_by_key(|(_, t)| t.created_at)
            .map(|(idx, _)| idx)
    }

    fn archive(&self, path: &std::path::Path, mut task: Task, reason: ArchiveReason) {
        task.archived_at = Some(Utc::now());
        task.archive_reason = Some(reason);

        let mut file: QueueFile = load_json_opt(path).unwrap_or_default();
        file.tasks.push(task);
        file.updated_at = Utc::now();

        if let Err(e) = write_json_atomic(path, &file) {
            warn!(path = %path.display(), error = %e, "Failed to write archive");
        }
    }

    fn persist(&self) -> Result<()> {
        let file = QueueFile {
            version: "1.0".to_string(),
            updated_at: Utc::now(),
            tasks: self.tasks.clone(),
        };
        write_json_atomic(&self.live_path, &file)
    }

    fn emit(&self, event: QueueEvent) {
        for listener in &self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if result.is_err() {
                warn!(event = event.event_type, "Queue listener panicked");
            }
        }
    }
}
