//! Persistent state: `.oss` path layout, atomic JSON files, and the
//! supervisor-owned state files (snapshot, TDD semaphore, update cache).
//!
//! Everything in this module follows the same recovery rule: a missing or
//! malformed file yields defaults, never an error. State is a cache; the
//! workflow log is the source of truth.

mod atomic;
mod paths;
mod snapshot;
mod tdd_lock;
mod update;

pub use atomic::{load_json_opt, load_json_or_default, write_json_atomic};
pub use paths::{OssPaths, update_state_file, user_config_file, user_oss_dir, user_settings_file};
pub use snapshot::{ChainStage, StatusLine, WorkflowSnapshot};
pub use tdd_lock::TddLock;
pub use update::UpdateState;
