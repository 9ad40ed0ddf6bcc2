//! In-flight turn bookkeeping for one runner.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::debug;

use super::types::{TurnError, TurnReply};

pub(crate) type TurnResult = Result<TurnReply, TurnError>;

/// One turn awaiting its terminal `result`.
pub(crate) struct PendingRequest {
    pub request_id: String,
    buffer: String,
    /// Set once from an `init` line and never changed afterwards.
    session_id: Option<String>,
    reply: oneshot::Sender<TurnResult>,
}

impl PendingRequest {
    pub fn new(request_id: String, reply: oneshot::Sender<TurnResult>) -> Self {
        Self {
            request_id,
            buffer: String::new(),
            session_id: None,
            reply,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Resolve with the accumulated text, or `fallback` if nothing streamed.
    pub fn resolve(self, fallback: Option<String>, captured_lines: Vec<String>) {
        let text = if self.buffer.is_empty() {
            fallback.unwrap_or_default()
        } else {
            self.buffer
        };
        Self::deliver(
            &self.request_id,
            self.reply,
            Ok(TurnReply {
                text,
                captured_lines,
            }),
        );
    }

    pub fn reject(self, err: TurnError) {
        Self::deliver(&self.request_id, self.reply, Err(err));
    }

    fn deliver(request_id: &str, reply: oneshot::Sender<TurnResult>, outcome: TurnResult) {
        if reply.send(outcome).is_err() {
            debug!(request_id, "Caller stopped waiting for turn");
        }
    }
}

/// Pending requests in insertion order plus per-session raw line logs.
#[derive(Default)]
pub(crate) struct PendingTable {
    requests: Vec<PendingRequest>,
    logs: HashMap<String, Vec<String>>,
}

impl PendingTable {
    pub fn contains(&self, request_id: &str) -> bool {
        self.requests.iter().any(|r| r.request_id == request_id)
    }

    pub fn insert(&mut self, request: PendingRequest) {
        self.requests.push(request);
    }

    /// Remove a request, dropping its session's log if nothing else uses it.
    pub fn remove(&mut self, request_id: &str) -> Option<PendingRequest> {
        let idx = self
            .requests
            .iter()
            .position(|r| r.request_id == request_id)?;
        let request = self.requests.remove(idx);
        if let Some(session_id) = request.session_id()
            && !self.references(session_id)
        {
            self.logs.remove(session_id);
        }
        Some(request)
    }

    /// Give `session_id` to the oldest request that has none yet.
    ///
    /// Returns the request id that received it.
    pub fn assign_session(&mut self, session_id: &str) -> Option<&str> {
        let request = self.requests.iter_mut().find(|r| r.session_id.is_none())?;
        request.session_id = Some(session_id.to_string());
        Some(&request.request_id)
    }

    pub fn references(&self, session_id: &str) -> bool {
        self.requests
            .iter()
            .any(|r| r.session_id() == Some(session_id))
    }

    /// Record a raw line for `session_id` while a request references it.
    pub fn capture(&mut self, session_id: &str, line: &str) -> bool {
        if !self.references(session_id) {
            return false;
        }
        self.logs
            .entry(session_id.to_string())
            .or_default()
            .push(line.to_string());
        true
    }

    /// Append an assistant fragment to the request bound to `session_id`.
    pub fn append_fragment(&mut self, session_id: &str, fragment: &str) -> bool {
        match self
            .requests
            .iter_mut()
            .find(|r| r.session_id() == Some(session_id))
        {
            Some(request) => {
                request.buffer.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Take the request bound to `session_id` together with its captured log.
    pub fn take_for_session(&mut self, session_id: &str) -> Option<(PendingRequest, Vec<String>)> {
        let idx = self
            .requests
            .iter()
            .position(|r| r.session_id() == Some(session_id))?;
        let request = self.requests.remove(idx);
        let captured = self.logs.remove(session_id).unwrap_or_default();
        Some((request, captured))
    }

    /// Empty the table, returning every outstanding request.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.logs.clear();
        std::mem::take(&mut self.requests)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn log_sessions(&self) -> usize {
        self.logs.len()
    }
}
