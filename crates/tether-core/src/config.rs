//! Configuration resolution for tether.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/tether/settings.json)
//! 3. Project config (.tether/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Complete tether configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Maximum number of live sessions (one subprocess each).
    pub max_sessions: usize,
    /// Path to the `claude` binary.
    pub claude_bin: PathBuf,
    /// Seconds to wait for graceful subprocess shutdown before SIGKILL.
    pub terminate_timeout_secs: u64,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            claude_bin: PathBuf::from("claude"),
            terminate_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

/// How the subprocess handles tool permission prompts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Leave the CLI's own permission settings untouched.
    #[default]
    Default,
    /// Pass `--dangerously-skip-permissions`.
    SkipPermissions,
}

/// Session default configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub default_model: String,
    /// How long a caller waits for a turn's `result` before giving up.
    pub request_timeout_secs: u64,
    /// Working directory for spawned processes; current directory when unset.
    pub working_directory: Option<PathBuf>,
    pub permission_mode: PermissionMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".to_string(),
            request_timeout_secs: 60,
            working_directory: None,
            permission_mode: PermissionMode::Default,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
        debug!(path = %global_path.display(), "Loaded global config");
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".tether").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
            debug!(path = %project_path.display(), "Loaded project config");
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".tether").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/tether/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("tether").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Read a single settings file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay project settings on top of `base`.
///
/// Project files only override values that differ from the built-in
/// defaults, so a project file naming one key keeps the global value of the
/// others.
fn merge_config(base: &mut Config, overlay: Config) {
    let defaults = Config::default();

    if overlay.daemon.max_sessions != defaults.daemon.max_sessions {
        base.daemon.max_sessions = overlay.daemon.max_sessions;
    }
    if overlay.daemon.claude_bin != defaults.daemon.claude_bin {
        base.daemon.claude_bin = overlay.daemon.claude_bin;
    }
    if overlay.daemon.terminate_timeout_secs != defaults.daemon.terminate_timeout_secs {
        base.daemon.terminate_timeout_secs = overlay.daemon.terminate_timeout_secs;
    }
    if overlay.daemon.log_level != defaults.daemon.log_level {
        base.daemon.log_level = overlay.daemon.log_level;
    }

    if overlay.sessions.default_model != defaults.sessions.default_model {
        base.sessions.default_model = overlay.sessions.default_model;
    }
    if overlay.sessions.request_timeout_secs != defaults.sessions.request_timeout_secs {
        base.sessions.request_timeout_secs = overlay.sessions.request_timeout_secs;
    }
    if overlay.sessions.working_directory.is_some() {
        base.sessions.working_directory = overlay.sessions.working_directory;
    }
    if overlay.sessions.permission_mode != defaults.sessions.permission_mode {
        base.sessions.permission_mode = overlay.sessions.permission_mode;
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("TETHER_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
        config.daemon.max_sessions = n;
    }
    if let Some(val) = var("TETHER_CLAUDE_BIN") {
        config.daemon.claude_bin = PathBuf::from(val);
    }
    if let Some(val) = var("TETHER_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = var("TETHER_DEFAULT_MODEL") {
        config.sessions.default_model = val;
    }
    if let Some(n) = var("TETHER_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.sessions.request_timeout_secs = n;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_request_timeout_is_60s() {
        let config = Config::default();
        assert_eq!(config.sessions.request_timeout_secs, 60);
        assert_eq!(config.daemon.claude_bin, PathBuf::from("claude"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"sessions":{"default_model":"opus"}}"#).unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.sessions.default_model, "opus");
        assert_eq!(config.sessions.request_timeout_secs, 60);
        assert_eq!(config.daemon, DaemonConfig::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn project_file_overrides_only_changed_keys() {
        let mut base = Config::default();
        base.daemon.max_sessions = 3;

        let mut overlay = Config::default();
        overlay.sessions.permission_mode = PermissionMode::SkipPermissions;
        merge_config(&mut base, overlay);

        assert_eq!(base.daemon.max_sessions, 3);
        assert_eq!(base.sessions.permission_mode, PermissionMode::SkipPermissions);
    }

    #[test]
    fn project_config_is_loaded_from_dot_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".tether")).unwrap();
        std::fs::write(
            dir.path().join(".tether").join("settings.json"),
            r#"{"sessions":{"permission_mode":"skip-permissions"}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.sessions.permission_mode, PermissionMode::SkipPermissions);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "TETHER_MAX_SESSIONS" => Some("2".into()),
            "TETHER_DEFAULT_MODEL" => Some("haiku".into()),
            "TETHER_REQUEST_TIMEOUT" => Some("not-a-number".into()),
            _ => None,
        });
        assert_eq!(config.daemon.max_sessions, 2);
        assert_eq!(config.sessions.default_model, "haiku");
        assert_eq!(config.sessions.request_timeout_secs, 60);
    }
}
