//! Self-update cache state
//!
//! Records the plugin version and prompt hashes/signatures last seen, so a
//! stale local cache can be detected without re-fetching anything.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{load_json_or_default, write_json_atomic};

/// Contents of `update-state.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    /// Plugin version last observed
    pub version: Option<String>,
    /// When the remote manifest was last checked
    pub last_checked: Option<DateTime<Utc>>,
    /// Manifest version from that check
    pub manifest_version: Option<String>,
    /// Content hash per prompt name
    pub prompt_hashes: BTreeMap<String, String>,
    /// Signature per prompt name
    pub prompt_signatures: BTreeMap<String, String>,
}

impl UpdateState {
    /// Load the update cache; malformed files fall back to defaults
    pub fn load(path: &Path) -> Self {
        debug!(path = %path.display(), "UpdateState::load");
        load_json_or_default(path)
    }

    /// Persist atomically
    pub fn save(&self, path: &Path) -> eyre::Result<()> {
        write_json_atomic(path, self)
    }

    /// Whether the cache was written by a different plugin version
    pub fn is_stale(&self, current_version: &str) -> bool {
        match self.version.as_deref() {
            Some(v) => v != current_version,
            None => true,
        }
    }

    /// Record a completed check against the remote manifest
    pub fn record_check(&mut self, version: &str, manifest_version: &str) {
        self.version = Some(version.to_string());
        self.manifest_version = Some(manifest_version.to_string());
        self.last_checked = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let state = UpdateState::load(&temp.path().join("update-state.json"));

        assert!(state.version.is_none());
        assert!(state.prompt_hashes.is_empty());
    }

    #[test]
    fn test_malformed_file_does_not_crash() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("update-state.json");
        std::fs::write(&path, "][").unwrap();

        let state = UpdateState::load(&path);
        assert!(state.version.is_none());
    }

    #[test]
    fn test_staleness() {
        let mut state = UpdateState::default();
        assert!(state.is_stale("2.1.0"));

        state.record_check("2.1.0", "14");
        assert!(!state.is_stale("2.1.0"));
        assert!(state.is_stale("2.2.0"));
        assert_eq!(state.manifest_version.as_deref(), Some("14"));
        assert!(state.last_checked.is_some());
    }

    #[test]
    fn test_round_trip_preserves_hashes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("update-state.json");

        let mut state = UpdateState::default();
        state.prompt_hashes.insert("ideate".to_string(), "abc123".to_string());
        state
            .prompt_signatures
            .insert("ideate".to_string(), "sig-1".to_string());
        state.save(&path).unwrap();

        let loaded = UpdateState::load(&path);
        assert_eq!(loaded.prompt_hashes["ideate"], "abc123");
        assert_eq!(loaded.prompt_signatures["ideate"], "sig-1");
    }
}
