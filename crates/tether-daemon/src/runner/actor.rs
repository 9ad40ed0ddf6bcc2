//! The session runner event loop.
//!
//! One task per runner consumes [`RunnerEvent`]s strictly in order. Every
//! state mutation happens inside that task, so nothing here is locked.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use tether_core::ndjson::{Message, SessionResult, UserTurn, parse_line};

use crate::subprocess::{ProcessHandle, ProcessSpawner, SpawnConfig};

use super::observer::{ObserverRegistry, ObserverSink};
use super::pending::{PendingRequest, PendingTable, TurnResult};
use super::pump::{run_output_pump, run_stderr_logger};
use super::types::{ObserverId, RunnerState, TurnError};

/// Commands and process notifications consumed by a runner.
pub(crate) enum RunnerEvent {
    Start,
    Retry,
    SendTurn {
        request_id: String,
        text: String,
        reply: oneshot::Sender<TurnResult>,
    },
    CancelRequest {
        request_id: String,
    },
    RegisterObserver {
        id: ObserverId,
        sink: Box<dyn ObserverSink>,
    },
    UnregisterObserver {
        id: ObserverId,
    },
    /// `generation` identifies which spawned process produced the line.
    OutputLine {
        generation: u64,
        line: String,
    },
    /// `None` when reported by a caller rather than a reader task.
    ProcessError {
        generation: Option<u64>,
        message: String,
    },
    ProcessExited {
        generation: u64,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

pub(crate) struct SessionRunner {
    session: Arc<str>,
    spawn_config: SpawnConfig,
    spawner: Arc<dyn ProcessSpawner>,
    terminate_timeout: Duration,
    state: watch::Sender<RunnerState>,
    /// Weak so the queue closes once every handle and reader is gone.
    events: mpsc::WeakUnboundedSender<RunnerEvent>,
    process: Option<ProcessHandle>,
    generation: u64,
    pending: PendingTable,
    observers: ObserverRegistry,
}

impl SessionRunner {
    pub fn new(
        session: Arc<str>,
        spawn_config: SpawnConfig,
        spawner: Arc<dyn ProcessSpawner>,
        terminate_timeout: Duration,
        state: watch::Sender<RunnerState>,
        events: mpsc::WeakUnboundedSender<RunnerEvent>,
    ) -> Self {
        Self {
            session,
            spawn_config,
            spawner,
            terminate_timeout,
            state,
            events,
            process: None,
            generation: 0,
            pending: PendingTable::default(),
            observers: ObserverRegistry::default(),
        }
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RunnerEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle(event).await.is_break() {
                return;
            }
        }
        debug!(session = %self.session, "All runner handles dropped");
        self.shutdown();
    }

    fn current_state(&self) -> RunnerState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: RunnerState) {
        debug!(session = %self.session, state = %next, "Runner state change");
        self.state.send_replace(next);
    }

    async fn handle(&mut self, event: RunnerEvent) -> ControlFlow<()> {
        match event {
            RunnerEvent::Start => match self.current_state() {
                RunnerState::Idle => self.launch().await,
                other => warn!(session = %self.session, state = %other, "Ignoring start"),
            },
            RunnerEvent::Retry => match self.current_state() {
                RunnerState::Error { .. } => self.launch().await,
                other => warn!(session = %self.session, state = %other, "Ignoring retry"),
            },
            RunnerEvent::SendTurn {
                request_id,
                text,
                reply,
            } => self.send_turn(request_id, &text, reply).await,
            RunnerEvent::CancelRequest { request_id } => {
                if let Some(request) = self.pending.remove(&request_id) {
                    info!(session = %self.session, %request_id, "Pending request cancelled");
                    request.reject(TurnError::Cancelled { request_id });
                }
            }
            RunnerEvent::RegisterObserver { id, sink } => self.observers.register(id, sink),
            RunnerEvent::UnregisterObserver { id } => {
                if self.observers.unregister(id) {
                    debug!(session = %self.session, %id, "Observer unregistered");
                }
            }
            RunnerEvent::OutputLine { generation, line } => {
                match self.current_state() {
                    _ if generation != self.generation => {
                        debug!(session = %self.session, generation, "Dropping stale output line");
                    }
                    RunnerState::Running => self.on_output_line(&line),
                    // The process may still be alive; observers keep seeing
                    // its output but no turn state changes.
                    RunnerState::Error { .. } => {
                        self.observers.broadcast(&line);
                    }
                    state => {
                        debug!(session = %self.session, %state, "Dropping output line");
                    }
                }
            }
            RunnerEvent::ProcessError {
                generation,
                message,
            } => {
                if generation.is_none_or(|g| g == self.generation) {
                    self.fail(message);
                }
            }
            RunnerEvent::ProcessExited { generation } => {
                if generation == self.generation && self.current_state().is_running() {
                    self.release_process();
                    self.fail("subprocess exited".to_string());
                }
            }
            RunnerEvent::Stop { done } => {
                self.shutdown();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Enter `Starting` and spawn a fresh process.
    async fn launch(&mut self) {
        self.release_process();
        self.generation += 1;
        self.set_state(RunnerState::Starting);

        let Some(events) = self.events.upgrade() else {
            self.fail("runner has no event queue".to_string());
            return;
        };

        let mut process = match self.spawner.spawn(&self.spawn_config).await {
            Ok(process) => process,
            Err(e) => {
                error!(session = %self.session, error = %e, "Subprocess start failed");
                self.set_state(RunnerState::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        let Some(stdout) = process.take_stdout() else {
            tokio::spawn(process.terminate(self.terminate_timeout));
            self.fail("subprocess stdout not available".to_string());
            return;
        };
        tokio::spawn(run_output_pump(
            Arc::clone(&self.session),
            self.generation,
            stdout,
            events,
        ));
        if let Some(stderr) = process.take_stderr() {
            tokio::spawn(run_stderr_logger(Arc::clone(&self.session), stderr));
        }

        info!(
            session = %self.session,
            process_id = %process.id,
            generation = self.generation,
            "Runner started"
        );
        self.process = Some(process);
        self.set_state(RunnerState::Running);
    }

    async fn send_turn(
        &mut self,
        request_id: String,
        text: &str,
        reply: oneshot::Sender<TurnResult>,
    ) {
        let state = self.current_state();
        let Some(process) = self.process.as_mut().filter(|_| state.is_running()) else {
            warn!(session = %self.session, %request_id, %state, "No live process, turn not sent");
            let _ = reply.send(Err(TurnError::NotRunning { state }));
            return;
        };

        if self.pending.contains(&request_id) {
            warn!(session = %self.session, %request_id, "Duplicate request id");
            let _ = reply.send(Err(TurnError::DuplicateRequest { request_id }));
            return;
        }

        let turn = UserTurn::new(text);
        let line = match turn.to_line() {
            Ok(line) => line,
            Err(e) => {
                let _ = reply.send(Err(TurnError::Io(e.to_string())));
                return;
            }
        };

        self.pending
            .insert(PendingRequest::new(request_id.clone(), reply));
        debug!(
            session = %self.session,
            %request_id,
            chars = turn.text().chars().count(),
            pending = self.pending.len(),
            "Turn sent"
        );

        if let Err(e) = process.write_line(&line).await {
            error!(session = %self.session, %request_id, error = %e, "Failed to write to stdin");
            if let Some(request) = self.pending.remove(&request_id) {
                request.reject(TurnError::Io(e.to_string()));
            }
            self.fail(format!("stdin write failed: {e}"));
        }
    }

    fn on_output_line(&mut self, line: &str) {
        self.observers.broadcast(line);

        let message = match parse_line(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(session = %self.session, error = %e, "Unparseable protocol line");
                return;
            }
        };

        if let Message::SystemInit(init) = &message {
            // The protocol never echoes our request ids, so an init is
            // attributed to the oldest request still without a session. This
            // misattributes if the CLI ever emits inits out of send order.
            match self.pending.assign_session(&init.session_id) {
                Some(request_id) => {
                    debug!(
                        session = %self.session,
                        request_id,
                        session_id = %init.session_id,
                        model = ?init.model,
                        cwd = ?init.cwd,
                        "Session bound"
                    );
                }
                None => {
                    debug!(session = %self.session, session_id = %init.session_id, "Init without waiting request");
                }
            }
        }

        if let Some(session_id) = message.session_id() {
            self.pending.capture(session_id, line);
        }

        match message {
            Message::Assistant(assistant) => {
                if let (Some(session_id), Some(fragment)) = (assistant.session_id, assistant.fragment)
                    && !self.pending.append_fragment(&session_id, &fragment)
                {
                    debug!(session = %self.session, %session_id, "Dropping unmatched assistant fragment");
                }
            }
            Message::Result(result) => self.finish_turn(result),
            _ => {}
        }
    }

    fn finish_turn(&mut self, result: SessionResult) {
        let Some((request, captured_lines)) = self.pending.take_for_session(&result.session_id)
        else {
            debug!(session = %self.session, session_id = %result.session_id, "Ignoring unmatched result");
            return;
        };

        info!(
            session = %self.session,
            request_id = %request.request_id,
            session_id = %result.session_id,
            is_error = result.is_error,
            duration_ms = ?result.duration_ms,
            cost_usd = ?result.cost_usd,
            "Turn complete"
        );

        if result.is_error {
            request.reject(TurnError::Remote {
                message: result.result.unwrap_or_else(|| "Unknown error".to_string()),
                captured_lines,
            });
        } else {
            request.resolve(result.result, captured_lines);
        }
    }

    /// Record a process-level failure. Outstanding requests stay pending.
    fn fail(&self, message: String) {
        if self.current_state().is_terminal() {
            return;
        }
        warn!(
            session = %self.session,
            pending = self.pending.len(),
            error = %message,
            "Runner entered error state"
        );
        self.set_state(RunnerState::Error { message });
    }

    fn release_process(&mut self) {
        if let Some(process) = self.process.take() {
            debug!(session = %self.session, process_id = %process.id, "Releasing process");
            tokio::spawn(process.terminate(self.terminate_timeout));
        }
    }

    /// Enter `Stopped`, rejecting and sweeping all per-turn state.
    fn shutdown(&mut self) {
        self.set_state(RunnerState::Stopped);
        debug!(
            session = %self.session,
            observers = self.observers.len(),
            logs = self.pending.log_sessions(),
            "Sweeping runner state"
        );
        let outstanding = self.pending.drain();
        if !outstanding.is_empty() {
            info!(session = %self.session, count = outstanding.len(), "Rejecting outstanding turns");
        }
        for request in outstanding {
            request.reject(TurnError::Stopped);
        }
        self.observers.clear();
        self.release_process();
        info!(session = %self.session, "Runner stopped");
    }
}
