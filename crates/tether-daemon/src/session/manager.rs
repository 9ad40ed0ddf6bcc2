//! Session table and turn routing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::runner::{ObserverSubscription, RunnerHandle, TurnReply};
use crate::subprocess::{ProcessSpawner, SpawnConfig};

use super::types::{ManagerConfig, Session, SessionError, SessionOptions};

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, Session>,
    next_seq: u64,
}

/// Creates, tracks, and tears down sessions.
pub struct SessionManager {
    sessions: Arc<RwLock<SessionTable>>,
    spawner: Arc<dyn ProcessSpawner>,
    config: ManagerConfig,
}

impl SessionManager {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: ManagerConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(SessionTable::default())),
            spawner,
            config,
        }
    }

    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register a new session and start its runner.
    ///
    /// Returns as soon as the runner is queued to start; the subprocess may
    /// still be launching.
    pub async fn create_session(&self, options: SessionOptions) -> Result<Session, SessionError> {
        let mut table = self.sessions.write().await;
        let session = self.insert_session(&mut table, options)?;
        drop(table);
        Ok(session)
    }

    fn insert_session(
        &self,
        table: &mut SessionTable,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        if table.sessions.len() >= self.config.max_sessions {
            warn!(max = self.config.max_sessions, "Session limit reached");
            return Err(SessionError::LimitReached {
                max: self.config.max_sessions,
            });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let model = options
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let working_directory = options
            .working_directory
            .unwrap_or_else(|| self.config.working_directory.clone());

        let spawn_config = SpawnConfig {
            working_directory: working_directory.clone(),
            model: Some(model.clone()),
            permission_mode: self.config.permission_mode,
        };
        let runner = RunnerHandle::spawn(
            id.as_str(),
            spawn_config,
            Arc::clone(&self.spawner),
            self.config.terminate_timeout,
        );
        runner.start();

        table.next_seq += 1;
        let session = Session {
            id: id.clone(),
            model,
            project: options.project,
            working_directory,
            created_at: Utc::now(),
            seq: table.next_seq,
            runner,
        };
        table.sessions.insert(id, session.clone());

        info!(
            session_id = %session.id,
            model = %session.model,
            project = ?session.project,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.sessions.get(id).cloned()
    }

    /// All sessions, oldest first, optionally limited to one project.
    pub async fn list_sessions(&self, project: Option<&str>) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .sessions
            .values()
            .filter(|s| project.is_none_or(|p| s.project.as_deref() == Some(p)))
            .cloned()
            .collect();
        sessions.sort_by_key(Session::order_key);
        sessions
    }

    /// Remove a session and stop its runner. Returns `false` if unknown.
    pub async fn delete_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.sessions.remove(id);
        let Some(session) = removed else {
            debug!(session_id = id, "Delete of unknown session");
            return false;
        };
        session.runner.stop().await;
        info!(session_id = id, "Session deleted");
        true
    }

    /// The oldest session, created on demand when none exist.
    ///
    /// Concurrent callers on an empty table get the same new session.
    pub async fn get_or_create_default(&self) -> Result<Session, SessionError> {
        let mut table = self.sessions.write().await;
        if let Some(oldest) = table.sessions.values().min_by_key(|s| s.order_key()) {
            let session = oldest.clone();
            drop(table);
            return Ok(session);
        }
        let session = self.insert_session(&mut table, SessionOptions::default())?;
        drop(table);
        Ok(session)
    }

    /// Send a turn and wait for its reply, bounded by the configured
    /// request timeout. On timeout the request is cancelled in the runner.
    pub async fn send_turn(
        &self,
        session_id: &str,
        request_id: &str,
        text: &str,
    ) -> Result<TurnReply, SessionError> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        let reply = session
            .runner
            .send_turn_timeout(request_id, text, self.config.request_timeout)
            .await?;
        Ok(reply)
    }

    /// Register a channel observer on a session's raw output.
    pub async fn subscribe(&self, session_id: &str) -> Result<ObserverSubscription, SessionError> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        Ok(session.runner.subscribe())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.sessions.len()
    }

    /// Stop every runner and empty the table.
    pub async fn shutdown(&self) {
        let drained: Vec<Session> = self
            .sessions
            .write()
            .await
            .sessions
            .drain()
            .map(|(_, s)| s)
            .collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Stopping all sessions");
        for session in drained {
            session.runner.stop().await;
        }
    }
}
