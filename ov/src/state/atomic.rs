//! Atomic JSON file helpers
//!
//! Every state file is rewritten in full: serialize to `<file>.tmp`, then
//! rename over the target. Readers recover from missing or malformed files
//! by returning defaults.

use std::fs;
use std::path::Path;

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Write a value as pretty JSON via temp file + rename
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    debug!(path = %path.display(), "write_json_atomic");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value).wrap_err("Failed to serialize state")?;
    fs::write(&tmp, &json).wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).wrap_err_with(|| format!("Failed to rename {} into place", tmp.display()))?;
    Ok(())
}

/// Load a JSON file, returning `None` when the file is missing or malformed
///
/// A malformed file is logged and treated as absent; the next successful
/// persist overwrites it.
pub fn load_json_opt<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        debug!(path = %path.display(), "load_json_opt: file does not exist");
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read state file");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed state file, falling back to defaults");
            None
        }
    }
}

/// Load a JSON file, falling back to `Default` when missing or malformed
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    load_json_opt(path).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sample.json");

        let value = Sample {
            name: "alpha".to_string(),
            count: 7,
        };
        write_json_atomic(&path, &value).unwrap();

        let loaded: Sample = load_json_or_default(&path);
        assert_eq!(loaded, value);
    }

    #[test]
    fn test_missing_file_yields_default() {
        let temp = TempDir::new().unwrap();
        let loaded: Sample = load_json_or_default(&temp.path().join("nope.json"));
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_malformed_file_yields_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded: Sample = load_json_or_default(&path);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sample.json");

        write_json_atomic(&path, &Sample::default()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deep/nested/sample.json");

        write_json_atomic(&path, &Sample::default()).unwrap();
        assert!(path.exists());
    }
}
