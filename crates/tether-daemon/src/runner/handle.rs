//! Cloneable front-end to a session runner task.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::subprocess::{ProcessSpawner, SpawnConfig};

use super::actor::{RunnerEvent, SessionRunner};
use super::observer::{ChannelObserver, ObserverSink};
use super::pending::TurnResult;
use super::types::{ObserverId, RunnerState, TurnError, TurnReply};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle used by callers to drive one session runner.
///
/// Every method enqueues an event and returns without waiting for the
/// runner, except where documented. Events from one handle (and its clones)
/// are processed in the order they were sent.
#[derive(Clone)]
pub struct RunnerHandle {
    session: Arc<str>,
    events: mpsc::UnboundedSender<RunnerEvent>,
    state: watch::Receiver<RunnerState>,
}

impl fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerHandle")
            .field("session", &self.session)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RunnerHandle {
    /// Spawn an idle runner task. Call [`start`](Self::start) to launch the
    /// subprocess.
    pub fn spawn(
        session: impl Into<Arc<str>>,
        spawn_config: SpawnConfig,
        spawner: Arc<dyn ProcessSpawner>,
        terminate_timeout: Duration,
    ) -> Self {
        let session = session.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunnerState::Idle);

        let runner = SessionRunner::new(
            Arc::clone(&session),
            spawn_config,
            spawner,
            terminate_timeout,
            state_tx,
            events_tx.downgrade(),
        );
        tokio::spawn(runner.run(events_rx));

        Self {
            session,
            events: events_tx,
            state: state_rx,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn state(&self) -> RunnerState {
        self.state.borrow().clone()
    }

    fn send(&self, event: RunnerEvent) -> bool {
        if self.events.send(event).is_err() {
            debug!(session = %self.session, "Runner already stopped");
            return false;
        }
        true
    }

    pub fn start(&self) -> bool {
        self.send(RunnerEvent::Start)
    }

    /// Re-launch the subprocess after an error.
    pub fn retry(&self) -> bool {
        self.send(RunnerEvent::Retry)
    }

    /// Wait until the runner leaves `Idle`/`Starting`.
    ///
    /// Returns the state it settled in.
    pub async fn wait_started(&self) -> RunnerState {
        self.wait_for_state(|s| !matches!(s, RunnerState::Idle | RunnerState::Starting))
            .await
    }

    /// Wait until `predicate` holds for the current state.
    ///
    /// Yields `Stopped` if the runner task is gone before that happens.
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(&RunnerState) -> bool,
    ) -> RunnerState {
        let mut state = self.state.clone();
        let settled = state.wait_for(|s| predicate(s)).await.map(|s| (*s).clone());
        settled.unwrap_or(RunnerState::Stopped)
    }

    /// Wait until the runner reaches `Running`.
    pub async fn wait_running(&self) -> Result<(), TurnError> {
        match self.wait_started().await {
            RunnerState::Running => Ok(()),
            state => Err(TurnError::NotRunning { state }),
        }
    }

    /// Submit a turn. The turn is queued before this returns; the returned
    /// future resolves once the matching `result` arrives.
    pub fn send_turn(&self, request_id: impl Into<String>, text: impl Into<String>) -> PendingTurn {
        let request_id = request_id.into();
        let (reply, rx) = oneshot::channel();
        self.send(RunnerEvent::SendTurn {
            request_id: request_id.clone(),
            text: text.into(),
            reply,
        });
        PendingTurn { request_id, rx }
    }

    /// Submit a turn and wait at most `timeout` for its reply.
    ///
    /// On timeout the pending request is dropped from the runner.
    pub async fn send_turn_timeout(
        &self,
        request_id: impl Into<String>,
        text: impl Into<String>,
        timeout: Duration,
    ) -> Result<TurnReply, TurnError> {
        let pending = self.send_turn(request_id, text);
        let request_id = pending.request_id().to_string();
        if let Ok(outcome) = tokio::time::timeout(timeout, pending).await {
            outcome
        } else {
            warn!(session = %self.session, %request_id, ?timeout, "Turn timed out");
            self.cancel(request_id.clone());
            Err(TurnError::Timeout {
                request_id,
                after: timeout,
            })
        }
    }

    /// Drop a pending request, e.g. after the caller gave up waiting.
    pub fn cancel(&self, request_id: impl Into<String>) -> bool {
        self.send(RunnerEvent::CancelRequest {
            request_id: request_id.into(),
        })
    }

    pub fn register_observer(&self, sink: impl ObserverSink + 'static) -> ObserverId {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        self.send(RunnerEvent::RegisterObserver {
            id,
            sink: Box::new(sink),
        });
        id
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.send(RunnerEvent::UnregisterObserver { id })
    }

    /// Register a channel-backed observer and return its receiving end.
    pub fn subscribe(&self) -> ObserverSubscription {
        let (tx, lines) = mpsc::unbounded_channel();
        let id = self.register_observer(ChannelObserver::new(tx));
        ObserverSubscription { id, lines }
    }

    /// Report a process-level failure observed outside the runner.
    pub fn report_process_error(&self, message: impl Into<String>) -> bool {
        self.send(RunnerEvent::ProcessError {
            generation: None,
            message: message.into(),
        })
    }

    /// Stop the runner and wait for it to finish its shutdown sweep.
    pub async fn stop(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(RunnerEvent::Stop { done }) {
            let _ = rx.await;
        }
    }
}

/// Future for a submitted turn.
///
/// Resolves to [`TurnError::Stopped`] if the runner goes away first.
#[derive(Debug)]
#[must_use = "the turn's reply is lost if this is dropped"]
pub struct PendingTurn {
    request_id: String,
    rx: oneshot::Receiver<TurnResult>,
}

impl PendingTurn {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Future for PendingTurn {
    type Output = Result<TurnReply, TurnError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(TurnError::Stopped)))
    }
}

/// A channel observer registered through [`RunnerHandle::subscribe`].
#[derive(Debug)]
pub struct ObserverSubscription {
    pub id: ObserverId,
    pub lines: mpsc::UnboundedReceiver<String>,
}
