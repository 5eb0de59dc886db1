//! Workflow log: the append-only source of truth
//!
//! Producers append structured entries; the supervisor tails them back out.
//! The on-disk format is hybrid: every entry is one JSON line followed by a
//! `#`-prefixed human summary line, so the file stays greppable by people
//! and parseable by machines at the same time.

mod entry;
mod reader;
mod writer;

pub use entry::{AgentRef, EventKind, LawChecklist, LogEntry, LAW_LABELS};
pub use reader::{EntryFilter, LogTailer, read_all, query_last};
pub use writer::LogWriter;
