//! TDD mode semaphore
//!
//! A presence-only file: while it exists, the supervisor must not enqueue
//! remediation for test failures, because the user is deliberately in a
//! red phase. Locks older than an hour are considered abandoned.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::atomic::{load_json_opt, write_json_atomic};

/// Age past which a lock no longer counts as intentional
const STALE_AFTER_SECS: i64 = 3600;

/// Contents of `tdd-mode.lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TddLock {
    pub created_at: DateTime<Utc>,
    pub cmd: String,
    pub feature: String,
}

impl TddLock {
    /// Create a lock for the given command and feature
    pub fn new(cmd: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            cmd: cmd.into(),
            feature: feature.into(),
        }
    }

    /// Whether a lock file is present at `path`
    pub fn is_present(path: &Path) -> bool {
        path.exists()
    }

    /// Write the lock file
    pub fn acquire(&self, path: &Path) -> eyre::Result<()> {
        info!(cmd = %self.cmd, feature = %self.feature, "TDD mode lock acquired");
        write_json_atomic(path, self)
    }

    /// Remove the lock file if present
    pub fn release(path: &Path) -> eyre::Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
            info!("TDD mode lock released");
        }
        Ok(())
    }

    /// Read the lock contents; unreadable contents still count as a lock
    pub fn load(path: &Path) -> Option<Self> {
        load_json_opt(path)
    }

    /// Whether this lock is older than the staleness cutoff
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::seconds(STALE_AFTER_SECS)
    }

    /// Remove the lock file when it is stale; returns whether it was removed
    ///
    /// A lock whose contents cannot be parsed has an unknown age and is
    /// treated as stale.
    pub fn reap_if_stale(path: &Path, now: DateTime<Utc>) -> bool {
        if !path.exists() {
            return false;
        }

        let stale = match Self::load(path) {
            Some(lock) => lock.is_stale(now),
            None => {
                warn!(path = %path.display(), "Unreadable TDD lock, treating as stale");
                true
            }
        };

        if stale {
            if let Err(e) = fs::remove_file(path) {
                warn!(error = %e, "Failed to remove stale TDD lock");
                return false;
            }
            info!("Removed stale TDD lock");
            return true;
        }

        debug!("TDD lock present and fresh");
        false
    }
}
