//! Configuration: supervisor settings and model-routing config
//!
//! Settings live in `~/.oss/settings.json`. Routing config merges
//! `~/.oss/config.json` under `<project>/.oss/config.json`, project keys
//! winning, with environment variables overriding api keys last.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::compliance::MonitorMode;
use crate::state::{OssPaths, user_config_file, user_settings_file};

/// Notification preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub sound: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
        }
    }
}

/// Compliance monitor preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceSettings {
    pub mode: MonitorMode,
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            mode: MonitorMode::Always,
            interval_secs: 5,
        }
    }
}

/// LLM fallback classifier preferences
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmFallbackSettings {
    pub enabled: bool,
    pub model: Option<String>,
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,
    #[serde(rename = "confidence-floor")]
    pub confidence_floor: Option<f64>,
}

/// Queue preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    #[serde(rename = "max-size")]
    pub max_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: crate::queue::DEFAULT_MAX_SIZE,
        }
    }
}

/// Supervisor settings (`~/.oss/settings.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub notifications: NotificationSettings,
    pub compliance: ComplianceSettings,
    #[serde(rename = "llm-fallback")]
    pub llm_fallback: LlmFallbackSettings,
    pub queue: QueueSettings,
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Settings {
    /// Load from the user scope; missing or malformed files mean defaults
    pub fn load() -> Self {
        match user_settings_file() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No home directory, using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        debug!(path = %path.display(), "Settings::load_from");
        crate::state::load_json_or_default(path)
    }
}

/// Model routing configuration, merged user-then-project
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Default model target (e.g. `ollama/llama3.3`)
    pub default: Option<String>,
    #[serde(rename = "fallback-enabled")]
    pub fallback_enabled: bool,
    pub agents: BTreeMap<String, String>,
    pub commands: BTreeMap<String, String>,
    pub skills: BTreeMap<String, String>,
    pub hooks: BTreeMap<String, String>,
    #[serde(rename = "api-keys")]
    pub api_keys: BTreeMap<String, String>,
    #[serde(rename = "ollama-base-url")]
    pub ollama_base_url: Option<String>,
}

/// Environment variables that override file-configured api keys
const ENV_KEY_OVERRIDES: [(&str, &str); 3] = [
    ("OPENROUTER_API_KEY", "openrouter"),
    ("OPENAI_API_KEY", "openai"),
    ("GEMINI_API_KEY", "gemini"),
];

impl RoutingConfig {
    /// Load and merge both scopes, then apply environment overrides
    pub fn load(paths: &OssPaths) -> Self {
        let user = user_config_file().and_then(|p| read_value(&p));
        let project = read_value(&paths.config_file());

        let merged = match (user, project) {
            (Some(user), Some(project)) => merge_values(user, project),
            (Some(user), None) => user,
            (None, Some(project)) => project,
            (None, None) => Value::Object(Default::default()),
        };

        let mut config: RoutingConfig = serde_json::from_value(merged).unwrap_or_else(|e| {
            warn!(error = %e, "Merged routing config malformed, using defaults");
            RoutingConfig::default()
        });
        config.apply_env();
        config
    }

    /// Overlay environment variables onto the api-keys map and base URL
    pub fn apply_env(&mut self) {
        for (var, provider) in ENV_KEY_OVERRIDES {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                self.api_keys.insert(provider.to_string(), value);
            }
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL")
            && !url.is_empty()
        {
            self.ollama_base_url = Some(url);
        }
    }

    /// API key for a provider, if configured
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys.get(provider).map(String::as_str)
    }

    /// Model routed for a named agent, falling back to the default target
    pub fn model_for_agent(&self, name: &str) -> Option<&str> {
        self.agents.get(name).or(self.default.as_ref()).map(String::as_str)
    }

    pub fn model_for_command(&self, name: &str) -> Option<&str> {
        self.commands.get(name).or(self.default.as_ref()).map(String::as_str)
    }

    pub fn model_for_skill(&self, name: &str) -> Option<&str> {
        self.skills.get(name).or(self.default.as_ref()).map(String::as_str)
    }

    pub fn model_for_hook(&self, name: &str) -> Option<&str> {
        self.hooks.get(name).or(self.default.as_ref()).map(String::as_str)
    }
}

fn read_value(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path).ok().map(|c| serde_json::from_str(&c)) {
        Some(Ok(value)) => Some(value),
        _ => {
            warn!(path = %path.display(), "Unreadable config file, skipping layer");
            None
        }
    }
}

/// Deep merge: objects merge per key, the overlay wins everywhere else
fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.notifications.enabled);
        assert_eq!(settings.compliance.interval_secs, 5);
        assert_eq!(settings.queue.max_size, 50);
        assert!(!settings.llm_fallback.enabled);
    }

    #[test]
    fn test_settings_malformed_file_is_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "oops").unwrap();

        let settings = Settings::load_from(&path);
        assert!(settings.notifications.enabled);
    }

    #[test]
    fn test_settings_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"queue": {"max-size": 10}}"#).unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.queue.max_size, 10);
        assert!(settings.notifications.enabled);
    }

    #[test]
    fn test_merge_project_wins_over_user() {
        let user = json!({
            "default": "ollama/llama3.3",
            "agents": { "debugger": "ollama/qwen", "planner": "ollama/llama3.3" },
            "api-keys": { "openrouter": "user-key" }
        });
        let project = json!({
            "default": "openrouter/anthropic/claude-sonnet-4",
            "agents": { "debugger": "openrouter/deepseek" }
        });

        let merged: RoutingConfig = serde_json::from_value(merge_values(user, project)).unwrap();
        assert_eq!(merged.default.as_deref(), Some("openrouter/anthropic/claude-sonnet-4"));
        assert_eq!(merged.agents["debugger"], "openrouter/deepseek");
        // User keys survive where the project is silent
        assert_eq!(merged.agents["planner"], "ollama/llama3.3");
        assert_eq!(merged.api_keys["openrouter"], "user-key");
    }

    #[test]
    #[serial]
    fn test_env_overrides_api_keys() {
        let mut config = RoutingConfig::default();
        config.api_keys.insert("openrouter".to_string(), "file-key".to_string());

        unsafe { std::env::set_var("OPENROUTER_API_KEY", "env-key") };
        config.apply_env();
        unsafe { std::env::remove_var("OPENROUTER_API_KEY") };

        assert_eq!(config.api_key("openrouter"), Some("env-key"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_ollama_base_url() {
        let mut config = RoutingConfig::default();

        unsafe { std::env::set_var("OLLAMA_BASE_URL", "http://10.0.0.5:11434") };
        config.apply_env();
        unsafe { std::env::remove_var("OLLAMA_BASE_URL") };

        assert_eq!(config.ollama_base_url.as_deref(), Some("http://10.0.0.5:11434"));
    }

    #[test]
    #[serial]
    fn test_load_with_project_file_only() {
        let temp = TempDir::new().unwrap();
        // Pin the user scope to an empty directory
        let prior_home = std::env::var_os("HOME");
        unsafe { std::env::set_var("HOME", temp.path()) };

        let paths = OssPaths::new(temp.path());
        paths.ensure().unwrap();
        std::fs::write(
            paths.config_file(),
            r#"{"default": "ollama/llama3.3", "fallback-enabled": true}"#,
        )
        .unwrap();

        let config = RoutingConfig::load(&paths);
        match prior_home {
            Some(home) => unsafe { std::env::set_var("HOME", home) },
            None => unsafe { std::env::remove_var("HOME") },
        }

        assert_eq!(config.default.as_deref(), Some("ollama/llama3.3"));
        assert!(config.fallback_enabled);
    }

    #[test]
    fn test_model_lookup_falls_back_to_default() {
        let mut config = RoutingConfig {
            default: Some("ollama/llama3.3".to_string()),
            ..Default::default()
        };
        config.agents.insert("debugger".to_string(), "openrouter/x".to_string());

        assert_eq!(config.model_for_agent("debugger"), Some("openrouter/x"));
        assert_eq!(config.model_for_agent("other"), Some("ollama/llama3.3"));
        assert_eq!(config.model_for_command("ship"), Some("ollama/llama3.3"));
    }

    #[test]
    fn test_malformed_project_config_recovers() {
        let temp = TempDir::new().unwrap();
        let paths = OssPaths::new(temp.path());
        paths.ensure().unwrap();
        std::fs::write(paths.config_file(), "{broken").unwrap();

        let config = RoutingConfig::load(&paths);
        assert!(config.default.is_none());
    }
}
