//! Log reader and tailer
//!
//! Reading skips summary lines, blank lines, and anything that fails to
//! parse. The tailer polls file size, reads only the delta up to the size
//! snapshot taken at the start of the tick, and resets to the beginning
//! when the file shrinks (rotation or truncation).

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::entry::{EventKind, LogEntry};

/// Default poll cadence for the tailer
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parse one line as a data entry, ignoring summaries and noise
fn parse_line(line: &str) -> Option<LogEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(entry) => Some(entry),
        Err(e) => {
            trace!(error = %e, "Skipping malformed log line");
            None
        }
    }
}

/// Read every data entry in the log, in append order
///
/// A missing file reads as an empty log.
pub fn read_all(path: &Path) -> Vec<LogEntry> {
    if !path.exists() {
        debug!(path = %path.display(), "read_all: no log file yet");
        return Vec::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read workflow log");
            return Vec::new();
        }
    };

    let entries: Vec<LogEntry> = content.lines().filter_map(parse_line).collect();
    debug!(count = entries.len(), "read_all: parsed entries");
    entries
}

/// Filter for [`query_last`]; unset fields match anything
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub cmd: Option<String>,
    pub event: Option<EventKind>,
    pub phase: Option<String>,
}

impl EntryFilter {
    /// Whether an entry satisfies every pinned field
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(cmd) = &self.cmd
            && !entry.cmd.eq_ignore_ascii_case(cmd)
        {
            return false;
        }
        if let Some(event) = self.event
            && entry.event != event
        {
            return false;
        }
        if let Some(phase) = &self.phase {
            match &entry.phase {
                Some(p) if p.eq_ignore_ascii_case(phase) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Newest entry matching the filter, scanning backwards
pub fn query_last(path: &Path, filter: &EntryFilter) -> Option<LogEntry> {
    read_all(path).into_iter().rev().find(|e| filter.matches(e))
}

/// Near-real-time tail of the workflow log
pub struct LogTailer {
    path: PathBuf,
    poll_interval: Duration,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl LogTailer {
    /// Create a tailer for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: POLL_INTERVAL,
            stop_tx: None,
            handle: None,
        }
    }

    /// Override the poll cadence (mostly for tests)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start tailing from the current end of file
    ///
    /// `callback` fires once per new data entry, in file order.
    pub fn start<F>(&mut self, mut callback: F)
    where
        F: FnMut(LogEntry) + Send + 'static,
    {
        let path = self.path.clone();
        let interval = self.poll_interval;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!(path = %path.display(), "tailer: started");
            let mut position = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            // Bytes after the last complete line, carried across ticks
            let mut carry = String::new();

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        debug!("tailer: stop requested");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let size = match fs::metadata(&path) {
                    Ok(m) => m.len(),
                    Err(_) => continue,
                };

                if size < position {
                    debug!(size, position, "tailer: file shrank, resetting to start");
                    position = 0;
                    carry.clear();
                }
                if size == position {
                    continue;
                }

                match read_delta(&path, position, size) {
                    Ok(chunk) => {
                        position = size;
                        carry.push_str(&chunk);

                        // Only consume complete lines; keep the partial tail
                        while let Some(newline) = carry.find('\n') {
                            let line: String = carry.drain(..=newline).collect();
                            if let Some(entry) = parse_line(&line) {
                                callback(entry);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "tailer: failed to read log delta");
                    }
                }
            }
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
    }

    /// Stop the poll loop; resolves once the task has exited
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        debug!("tailer: stopped");
    }

    /// Whether the tailer is currently running
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

/// Read bytes `[from, to)` of the file
fn read_delta(path: &Path, from: u64, to: u64) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = vec![0u8; (to - from) as usize];
    file.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
