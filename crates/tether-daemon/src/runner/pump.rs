//! Background readers feeding subprocess output into a runner.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use tether_core::ndjson::{Frame, LineDecoder};

use super::actor::RunnerEvent;

/// Read stdout until EOF or error, forwarding each decoded line.
///
/// Lines, the final partial line, and the exit notice all go through the
/// same queue, so the runner sees them in stream order.
pub(crate) async fn run_output_pump<R>(
    session: Arc<str>,
    generation: u64,
    stdout: R,
    events: mpsc::UnboundedSender<RunnerEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stdout, LineDecoder::new());

    while let Some(frame) = framed.next().await {
        match frame {
            Ok(Frame::Line(line)) => {
                if events.send(RunnerEvent::OutputLine { generation, line }).is_err() {
                    debug!(%session, "Runner gone, stopping output pump");
                    return;
                }
            }
            Ok(Frame::Overflow { limit }) => {
                warn!(%session, generation, limit, "stdout line too long, discarding");
            }
            Err(e) => {
                warn!(%session, generation, error = %e, "stdout read failed");
                let _ = events.send(RunnerEvent::ProcessError {
                    generation: Some(generation),
                    message: format!("stdout read failed: {e}"),
                });
                return;
            }
        }
    }

    info!(%session, generation, "stdout closed");
    let _ = events.send(RunnerEvent::ProcessExited { generation });
}

/// Log every stderr line until the stream ends.
pub(crate) async fn run_stderr_logger<R>(session: Arc<str>, stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(stderr, LineDecoder::new());
    while let Some(frame) = framed.next().await {
        match frame {
            Ok(Frame::Line(line)) => warn!(%session, "stderr: {}", line),
            Ok(Frame::Overflow { limit }) => {
                warn!(%session, limit, "stderr line too long, discarding");
            }
            Err(e) => {
                debug!(%session, error = %e, "stderr read failed");
                return;
            }
        }
    }
    debug!(%session, "stderr reader finished");
}
