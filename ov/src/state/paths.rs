//! `.oss` directory layout for project and user scope

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tracing::debug;

/// Well-known file locations under a project's `.oss` directory.
///
/// The supervisor, queue manager, and proxy all resolve their files through
/// this type so ownership stays in one place.
#[derive(Debug, Clone)]
pub struct OssPaths {
    dir: PathBuf,
}

impl OssPaths {
    /// Resolve the `.oss` directory for a project root
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        let dir = project_root.as_ref().join(".oss");
        debug!(?dir, "OssPaths::new");
        Self { dir }
    }

    /// Create the `.oss` directory if it does not exist
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).wrap_err_with(|| format!("Failed to create {}", self.dir.display()))
    }

    /// The `.oss` directory itself
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append-only workflow log
    pub fn workflow_log(&self) -> PathBuf {
        self.dir.join("workflow.log")
    }

    /// Chain-state snapshot cache
    pub fn state_file(&self) -> PathBuf {
        self.dir.join("workflow-state.json")
    }

    /// Live task queue
    pub fn queue_file(&self) -> PathBuf {
        self.dir.join("queue.json")
    }

    /// Archive of failed tasks
    pub fn queue_failed_file(&self) -> PathBuf {
        self.dir.join("queue-failed.json")
    }

    /// Archive of expired (cap-evicted) tasks
    pub fn queue_expired_file(&self) -> PathBuf {
        self.dir.join("queue-expired.json")
    }

    /// Presence-only TDD mode semaphore
    pub fn tdd_lock_file(&self) -> PathBuf {
        self.dir.join("tdd-mode.lock")
    }

    /// Supervisor PID file (single integer ASCII)
    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("watcher.pid")
    }

    /// Project-scope routing config
    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.json")
    }
}

/// The user-scope `.oss` directory (`~/.oss`), if a home directory exists
pub fn user_oss_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".oss"))
}

/// User-scope routing config (`~/.oss/config.json`)
pub fn user_config_file() -> Option<PathBuf> {
    user_oss_dir().map(|d| d.join("config.json"))
}

/// User-scope supervisor settings (`~/.oss/settings.json`)
pub fn user_settings_file() -> Option<PathBuf> {
    user_oss_dir().map(|d| d.join("settings.json"))
}

/// User-scope self-update cache (`~/.oss/update-state.json`)
pub fn update_state_file() -> Option<PathBuf> {
    user_oss_dir().map(|d| d.join("update-state.json"))
}
