//! Claude Code subprocess spawning.
//!
//! The runner only depends on [`ProcessSpawner`]; [`ClaudeSpawner`] is the
//! production implementation that launches the `claude` CLI in stream-json
//! mode.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use tether_core::config::PermissionMode;

use super::handle::{BoxedReader, ProcessHandle};

/// Configuration for subprocess spawning.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Working directory for the Claude process.
    pub working_directory: PathBuf,
    /// Model to use.
    pub model: Option<String>,
    /// Permission handling mode.
    pub permission_mode: PermissionMode,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            working_directory: std::env::current_dir().unwrap_or_default(),
            model: None,
            permission_mode: PermissionMode::default(),
        }
    }
}

/// Creates the subprocess a session runner drives.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, config: &SpawnConfig) -> Result<ProcessHandle, SubprocessError>;
}

/// Spawns the `claude` CLI speaking stream-json on stdin/stdout.
#[derive(Debug, Clone)]
pub struct ClaudeSpawner {
    /// Path to the `claude` binary.
    claude_bin: PathBuf,
}

impl ClaudeSpawner {
    pub fn new(claude_bin: impl Into<PathBuf>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
        }
    }

    /// Build the command line without spawning it.
    pub fn command(&self, config: &SpawnConfig) -> Command {
        let working_dir = resolve_working_dir(config);
        let mut cmd = Command::new(&self.claude_bin);
        cmd.current_dir(&working_dir)
            .arg("--print")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Ensure essential env vars are available to the subprocess even
        // when running under a service manager with a stripped environment.
        for key in ["HOME", "PATH", "ANTHROPIC_API_KEY"] {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        if matches!(config.permission_mode, PermissionMode::SkipPermissions) {
            cmd.arg("--dangerously-skip-permissions");
        }

        if let Some(ref model) = config.model {
            cmd.arg("--model").arg(model);
        }

        cmd
    }
}

#[async_trait]
impl ProcessSpawner for ClaudeSpawner {
    async fn spawn(&self, config: &SpawnConfig) -> Result<ProcessHandle, SubprocessError> {
        let mut cmd = self.command(config);

        info!(
            claude_bin = %self.claude_bin.display(),
            model = ?config.model,
            "Spawning claude subprocess"
        );
        let mut child = cmd.spawn().map_err(|e| SubprocessError::SpawnFailed {
            reason: format!("{}: {e}", self.claude_bin.display()),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdout" })?;
        let stderr = child.stderr.take();

        let process_id = uuid::Uuid::new_v4().to_string();
        info!(process_id, pid = ?child.id(), "Claude subprocess started");

        Ok(ProcessHandle::new(
            process_id,
            Box::new(stdin),
            Box::new(stdout),
            stderr.map(|s| Box::new(s) as BoxedReader),
        )
        .with_child(child))
    }
}

fn resolve_working_dir(config: &SpawnConfig) -> PathBuf {
    if !config.working_directory.as_os_str().is_empty() && config.working_directory.exists() {
        return config.working_directory.clone();
    }
    let fallback = dirs::home_dir().unwrap_or_else(|| {
        warn!("dirs::home_dir() returned None; falling back to temp_dir for working directory");
        std::env::temp_dir()
    });
    warn!(
        requested = %config.working_directory.display(),
        fallback = %fallback.display(),
        "Working directory missing or empty, using fallback"
    );
    fallback
}

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn subprocess: {reason}")]
    SpawnFailed { reason: String },

    #[error("Subprocess {pipe} was not captured")]
    MissingPipe { pipe: &'static str },
}
