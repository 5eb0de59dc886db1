//! Supervisor process management
//!
//! PID file handling and process control. Exactly one supervisor may watch
//! a project at a time; liveness is probed with signal 0, and a PID file
//! whose process is gone is cleaned up silently.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use eyre::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by process control
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Another supervisor instance is running with PID {0}")]
    AlreadyRunning(u32),
    #[error("Supervisor is not running")]
    NotRunning,
}

/// Guard over `<project>/.oss/watcher.pid`
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "PidFile::new: called");
        Self { path }
    }

    /// PID stored in the file, if any
    fn stored_pid(&self) -> Option<u32> {
        debug!(?self.path, "PidFile::stored_pid: called");
        if !self.path.exists() {
            debug!("PidFile::stored_pid: pid file does not exist");
            return None;
        }
        let pid = fs::read_to_string(&self.path).ok()?.trim().parse().ok();
        debug!(?pid, "PidFile::stored_pid: returning");
        pid
    }

    /// PID of a live supervisor, if one is running
    pub fn running_pid(&self) -> Option<u32> {
        debug!("PidFile::running_pid: called");
        let result = self.stored_pid().filter(|&pid| is_process_alive(pid));
        debug!(?result, "PidFile::running_pid: returning");
        result
    }

    /// Claim the PID file for this process
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when a live supervisor
    /// holds it; a stale file is removed without comment.
    pub fn acquire(&self) -> Result<(), DaemonError> {
        debug!(?self.path, "PidFile::acquire: called");
        if let Some(pid) = self.stored_pid() {
            if is_process_alive(pid) {
                debug!(pid, "PidFile::acquire: live holder found, returning Conflict");
                return Err(DaemonError::AlreadyRunning(pid));
            }
            debug!(pid, "PidFile::acquire: removing stale pid file");
            let _ = fs::remove_file(&self.path);
        }

        if let Some(parent) = self.path.parent() {
            debug!(?parent, "PidFile::acquire: ensuring parent directory");
            let _ = fs::create_dir_all(parent);
        }

        let own = std::process::id();
        debug!(pid = own, "PidFile::acquire: writing own pid");
        if let Err(e) = fs::write(&self.path, own.to_string()) {
            warn!(error = %e, "Failed to write pid file");
        } else {
            debug!(pid = own, path = %self.path.display(), "Wrote pid file");
        }
        debug!("PidFile::acquire: returning Ok");
        Ok(())
    }

    /// Remove the PID file
    pub fn release(&self) {
        debug!(?self.path, "PidFile::release: called");
        if !self.path.exists() {
            debug!("PidFile::release: file does not exist");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(error = %e, "Failed to remove pid file");
        } else {
            debug!(path = %self.path.display(), "Removed pid file");
        }
        debug!("PidFile::release: done");
    }

    pub fn path(&self) -> &PathBuf {
        debug!(?self.path, "PidFile::path: called");
        &self.path
    }
}

/// Spawn the current executable as a detached `run-daemon` process
pub fn spawn_detached(project_root: &std::path::Path) -> Result<u32> {
    debug!(project = %project_root.display(), "spawn_detached: called");
    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    debug!(?exe, "spawn_detached: launching run-daemon");

    let child = Command::new(&exe)
        .arg("run-daemon")
        .current_dir(project_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn supervisor process")?;

    let pid = child.id();
    debug!(pid, "spawn_detached: returning");
    info!(pid, "Supervisor spawned");
    Ok(pid)
}

/// Terminate a running supervisor, escalating if it lingers
pub fn terminate(pid: u32) -> Result<()> {
    debug!(pid, "terminate: called");
    info!(pid, "Stopping supervisor");

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        debug!(pid, "terminate: sending SIGTERM");
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).context("Failed to send SIGTERM")?;

        debug!(pid, "terminate: waiting for process to exit");
        let mut attempts = 0;
        while is_process_alive(pid) && attempts < 50 {
            std::thread::sleep(std::time::Duration::from_millis(100));
            attempts += 1;
        }
        debug!(attempts, "terminate: waited for process");

        if is_process_alive(pid) {
            debug!(pid, "terminate: process still running, sending SIGKILL");
            warn!(pid, "Supervisor did not stop gracefully, sending SIGKILL");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        } else {
            debug!(pid, "terminate: process exited gracefully");
        }
    }

    #[cfg(not(unix))]
    {
        debug!(pid, "terminate: using taskkill");
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .context("Failed to kill process")?;
    }

    info!(pid, "Supervisor stopped");
    debug!(pid, "terminate: done");
    Ok(())
}

/// Signal-0 liveness probe
pub fn is_process_alive(pid: u32) -> bool {
    debug!(pid, "is_process_alive: called");
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let result = kill(Pid::from_raw(pid as i32), None).is_ok();
        debug!(pid, result, "is_process_alive: unix check");
        result
    }

    #[cfg(not(unix))]
    {
        debug!(pid, "is_process_alive: unknown platform, assuming alive");
        let _ = pid;
        true
    }
}
