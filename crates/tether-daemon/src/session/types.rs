//! Session manager types.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tether_core::Config;
use tether_core::config::PermissionMode;

use crate::runner::{RunnerHandle, RunnerState, TurnError};

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of sessions alive at once.
    pub max_sessions: usize,
    /// Model used when a session is created without one.
    pub default_model: String,
    pub working_directory: PathBuf,
    pub permission_mode: PermissionMode,
    /// How long [`SessionManager::send_turn`](super::SessionManager::send_turn)
    /// waits for a reply.
    pub request_timeout: Duration,
    /// Grace period before a stopped subprocess is killed.
    pub terminate_timeout: Duration,
}

impl ManagerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_sessions: config.daemon.max_sessions,
            default_model: config.sessions.default_model.clone(),
            working_directory: config
                .sessions
                .working_directory
                .clone()
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default()),
            permission_mode: config.sessions.permission_mode,
            request_timeout: Duration::from_secs(config.sessions.request_timeout_secs),
            terminate_timeout: Duration::from_secs(config.daemon.terminate_timeout_secs),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-session overrides for [`SessionManager::create_session`](super::SessionManager::create_session).
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub model: Option<String>,
    /// Free-form project tag used to filter listings.
    pub project: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl SessionOptions {
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// A registered session and the runner driving it.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub model: String,
    pub project: Option<String>,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Insertion order, breaks `created_at` ties.
    #[serde(skip)]
    pub(crate) seq: u64,
    #[serde(skip)]
    pub runner: RunnerHandle,
}

impl Session {
    pub fn state(&self) -> RunnerState {
        self.runner.state()
    }

    pub(crate) fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// Session manager errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session limit reached (max: {max})")]
    LimitReached { max: usize },

    #[error(transparent)]
    Turn(#[from] TurnError),
}
