//! Owned I/O handles of one running subprocess.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Writable end connected to the subprocess's stdin.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Readable end connected to the subprocess's stdout or stderr.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to a running subprocess, exclusively owned by one session runner.
///
/// The stdout and stderr readers are handed off to background readers once
/// the runner starts; stdin stays with the handle and is only written by the
/// runner's event loop.
pub struct ProcessHandle {
    /// Unique identifier for this process.
    pub id: String,
    stdin: BoxedWriter,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    child: Option<Child>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("pid", &self.pid())
            .field("has_stdout", &self.stdout.is_some())
            .field("has_stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn new(
        id: impl Into<String>,
        stdin: BoxedWriter,
        stdout: BoxedReader,
        stderr: Option<BoxedReader>,
    ) -> Self {
        Self {
            id: id.into(),
            stdin,
            stdout: Some(stdout),
            stderr,
            child: None,
        }
    }

    /// Attach the OS child so [`terminate`](Self::terminate) can signal it.
    #[must_use]
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Write one protocol line (already newline-terminated) and flush.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    pub fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    /// Close stdin and stop the process.
    ///
    /// Sends SIGINT first and waits up to `timeout` for a graceful exit
    /// before killing. Handles without a child just drop their pipes.
    pub async fn terminate(self, timeout: Duration) {
        let Self {
            id,
            mut stdin,
            child,
            ..
        } = self;

        if let Err(e) = stdin.shutdown().await {
            debug!(process_id = %id, error = %e, "stdin already closed");
        }
        drop(stdin);

        let Some(mut child) = child else {
            debug!(process_id = %id, "Released process handle");
            return;
        };

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid is a valid process ID obtained from our own Child handle.
                // kill(2) with SIGINT is safe to call on any owned subprocess.
                #[allow(unsafe_code)]
                #[allow(clippy::cast_possible_wrap)]
                let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
                if ret != 0 {
                    let err = std::io::Error::last_os_error();
                    warn!(process_id = %id, pid, error = %err, "Failed to send SIGINT");
                }
            }
        }

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(process_id = %id, ?status, "Process exited");
            }
            Ok(Err(e)) => {
                warn!(process_id = %id, error = %e, "Error waiting for process");
                child.kill().await.ok();
            }
            Err(_) => {
                warn!(process_id = %id, "Timeout waiting for graceful shutdown, killing");
                child.kill().await.ok();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn write_line_reaches_reader() {
        let (stdin_w, stdin_r) = tokio::io::duplex(256);
        let (_stdout_w, stdout_r) = tokio::io::duplex(256);
        let mut handle = ProcessHandle::new("p1", Box::new(stdin_w), Box::new(stdout_r), None);

        handle.write_line("{\"type\":\"user\"}\n").await.unwrap();

        let mut lines = BufReader::new(stdin_r).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"type\":\"user\"}");
    }

    #[tokio::test]
    async fn terminate_closes_stdin() {
        let (stdin_w, stdin_r) = tokio::io::duplex(256);
        let (_stdout_w, stdout_r) = tokio::io::duplex(256);
        let mut handle = ProcessHandle::new("p1", Box::new(stdin_w), Box::new(stdout_r), None);
        assert!(handle.take_stdout().is_some());
        assert!(handle.take_stdout().is_none());

        handle.terminate(Duration::from_millis(10)).await;

        let mut lines = BufReader::new(stdin_r).lines();
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
