//! In-memory subprocess doubles for unit tests.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::{Mutex, mpsc};

use crate::subprocess::{ProcessHandle, ProcessSpawner, SpawnConfig, SubprocessError};

/// Test-side ends of one fake subprocess.
pub(crate) struct FakeProcess {
    pub config: SpawnConfig,
    stdin: Lines<BufReader<DuplexStream>>,
    stdout: Option<DuplexStream>,
}

impl FakeProcess {
    /// Next line the runner wrote to stdin.
    pub async fn read_turn(&mut self) -> serde_json::Value {
        let line = self.stdin.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Write raw bytes to the runner's stdout.
    pub async fn write(&mut self, bytes: &[u8]) {
        let stdout = self.stdout.as_mut().unwrap();
        stdout.write_all(bytes).await.unwrap();
        stdout.flush().await.unwrap();
    }

    pub async fn emit(&mut self, line: &str) {
        self.write(format!("{line}\n").as_bytes()).await;
    }

    /// Close stdout, as if the process exited.
    pub fn close_stdout(&mut self) {
        self.stdout = None;
    }
}

/// Spawner that hands every created process to the test.
pub(crate) struct FakeSpawner {
    processes: mpsc::UnboundedSender<FakeProcess>,
    failures_left: AtomicUsize,
}

impl FakeSpawner {
    pub fn new() -> (Arc<Self>, FakeProcesses) {
        Self::failing(0)
    }

    /// The first `failures` spawns return an error.
    pub fn failing(failures: usize) -> (Arc<Self>, FakeProcesses) {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawner = Arc::new(Self {
            processes: tx,
            failures_left: AtomicUsize::new(failures),
        });
        (spawner, FakeProcesses(Mutex::new(rx)))
    }
}

pub(crate) struct FakeProcesses(Mutex<mpsc::UnboundedReceiver<FakeProcess>>);

impl FakeProcesses {
    pub async fn next(&self) -> FakeProcess {
        self.0.lock().await.recv().await.unwrap()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, config: &SpawnConfig) -> Result<ProcessHandle, SubprocessError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SubprocessError::SpawnFailed {
                reason: "fake spawn failure".into(),
            });
        }

        let (stdin_w, stdin_r) = tokio::io::duplex(64 * 1024);
        let (stdout_w, stdout_r) = tokio::io::duplex(64 * 1024);
        let _ = self.processes.send(FakeProcess {
            config: config.clone(),
            stdin: BufReader::new(stdin_r).lines(),
            stdout: Some(stdout_w),
        });
        Ok(ProcessHandle::new(
            "fake",
            Box::new(stdin_w),
            Box::new(stdout_r),
            None,
        ))
    }
}

pub(crate) fn init_line(session_id: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{session_id}"}}"#)
}

pub(crate) fn assistant_line(session_id: &str, text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "session_id": session_id,
        "message": {"content": [{"text": text}]},
    })
    .to_string()
}

pub(crate) fn result_line(session_id: &str, is_error: bool, result: &str) -> String {
    serde_json::json!({
        "type": "result",
        "session_id": session_id,
        "is_error": is_error,
        "result": result,
    })
    .to_string()
}
