//! Log writer
//!
//! All appends from one process funnel through a single writer task so
//! entries are never torn or reordered. Each entry becomes one buffered
//! `write_all` of the full hybrid block, which keeps concurrent processes
//! safe under OS append atomicity.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use eyre::{Context, Result, eyre};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::entry::{EventKind, LAW_LABELS, LogEntry};

/// Handle for appending entries to the workflow log
#[derive(Clone)]
pub struct LogWriter {
    tx: mpsc::Sender<WriteRequest>,
}

struct WriteRequest {
    entry: LogEntry,
    ack: oneshot::Sender<Result<()>>,
}

impl LogWriter {
    /// Create a writer for `path`, spawning its background task
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "LogWriter::new");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(writer_task(path, rx));
        Self { tx }
    }

    /// Append one entry; resolves when the block is on disk
    pub async fn append(&self, entry: LogEntry) -> Result<()> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest { entry, ack })
            .await
            .map_err(|_| eyre!("Log writer task has shut down"))?;
        ack_rx.await.map_err(|_| eyre!("Log writer dropped the request"))?
    }

    /// Render the full on-disk block for an entry
    pub fn format_block(entry: &LogEntry) -> Result<String> {
        let json = serde_json::to_string(entry).wrap_err("Failed to serialize log entry")?;
        let mut block = format!("{}\n# {}\n", json, entry.summary());

        if matches!(entry.event, EventKind::Complete | EventKind::AgentComplete)
            && let Some(checklist) = &entry.iron_laws
        {
            block.push_str("# IRON LAW COMPLIANCE:\n");
            for (idx, (verdict, (_, label))) in checklist.verdicts().iter().zip(LAW_LABELS).enumerate() {
                let mark = if *verdict { "✓" } else { "✗" };
                block.push_str(&format!("# [{}] LAW #{}: {}\n", mark, idx + 1, label));
            }
            block.push_str(&format!("# Result: {}/6 laws observed\n#\n", checklist.passed_count()));
        }

        Ok(block)
    }
}

async fn writer_task(path: PathBuf, mut rx: mpsc::Receiver<WriteRequest>) {
    debug!(?path, "writer_task: started");
    let mut file: Option<File> = None;
    let mut last_ts = None;

    while let Some(mut req) = rx.recv().await {
        // Timestamps never go backwards within one process
        if let Some(last) = last_ts
            && req.entry.ts < last
        {
            req.entry.ts = last;
        }
        last_ts = Some(req.entry.ts);

        let result = append_once(&path, &mut file, &req.entry);
        if let Err(e) = &result {
            error!(error = %e, "Failed to append log entry");
            file = None;
        }
        let _ = req.ack.send(result);
    }

    debug!("writer_task: channel closed, shutting down");
}

fn append_once(path: &PathBuf, file: &mut Option<File>, entry: &LogEntry) -> Result<()> {
    if file.is_none() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).wrap_err("Failed to create log directory")?;
        }
        let opened = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
        *file = Some(opened);
    }

    let block = LogWriter::format_block(entry)?;
    let handle = file.as_mut().expect("file opened above");
    handle.write_all(block.as_bytes()).wrap_err("Failed to write log block")?;
    handle.flush().wrap_err("Failed to flush log")?;
    Ok(())
}
