//! Observer registry: passive sinks that see every raw output line.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::ObserverId;

/// Error returned by a sink that can no longer accept lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Observer send failed: {0}")]
pub struct ObserverError(pub String);

/// Receives raw protocol lines verbatim, e.g. a connected UI log stream.
pub trait ObserverSink: Send {
    fn send(&mut self, line: &str) -> Result<(), ObserverError>;
}

impl<F> ObserverSink for F
where
    F: FnMut(&str) -> Result<(), ObserverError> + Send,
{
    fn send(&mut self, line: &str) -> Result<(), ObserverError> {
        self(line)
    }
}

/// Sink that forwards lines into an unbounded channel.
///
/// Fails once the receiving side is dropped, which evicts it.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelObserver {
    pub const fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl ObserverSink for ChannelObserver {
    fn send(&mut self, line: &str) -> Result<(), ObserverError> {
        self.tx
            .send(line.to_string())
            .map_err(|_| ObserverError("receiver dropped".into()))
    }
}

/// Observers of one runner, in registration order.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    sinks: Vec<(ObserverId, Box<dyn ObserverSink>)>,
}

impl ObserverRegistry {
    pub fn register(&mut self, id: ObserverId, sink: Box<dyn ObserverSink>) {
        self.sinks.retain(|(existing, _)| *existing != id);
        self.sinks.push((id, sink));
        debug!(%id, observers = self.sinks.len(), "Observer registered");
    }

    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(existing, _)| *existing != id);
        before != self.sinks.len()
    }

    /// Deliver `line` to every sink, evicting the ones that fail.
    ///
    /// Returns how many sinks accepted the line.
    pub fn broadcast(&mut self, line: &str) -> usize {
        self.sinks.retain_mut(|(id, sink)| match sink.send(line) {
            Ok(()) => true,
            Err(e) => {
                warn!(%id, error = %e, "Evicting observer");
                false
            }
        });
        self.sinks.len()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn clear(&mut self) {
        self.sinks.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Box<dyn ObserverSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = move |line: &str| -> Result<(), ObserverError> {
            sink_seen.lock().unwrap().push(line.to_string());
            Ok(())
        };
        (seen, Box::new(sink))
    }

    #[test]
    fn broken_sink_is_evicted_without_affecting_others() {
        let mut registry = ObserverRegistry::default();
        let (first, first_sink) = recorder();
        let (last, last_sink) = recorder();

        registry.register(ObserverId(1), first_sink);
        registry.register(
            ObserverId(2),
            Box::new(|_: &str| -> Result<(), ObserverError> {
                Err(ObserverError("socket closed".into()))
            }),
        );
        registry.register(ObserverId(3), last_sink);

        assert_eq!(registry.broadcast("a"), 2);
        assert_eq!(registry.broadcast("b"), 2);

        assert_eq!(first.lock().unwrap().as_slice(), ["a", "b"]);
        assert_eq!(last.lock().unwrap().as_slice(), ["a", "b"]);
        assert!(!registry.unregister(ObserverId(2)));
    }

    #[test]
    fn unregister_stops_delivery() {
        let mut registry = ObserverRegistry::default();
        let (seen, sink) = recorder();
        registry.register(ObserverId(7), sink);

        for line in ["1", "2", "3"] {
            registry.broadcast(line);
        }
        assert!(registry.unregister(ObserverId(7)));
        for line in ["4", "5"] {
            registry.broadcast(line);
        }

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn channel_observer_fails_after_receiver_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = ChannelObserver::new(tx);
        assert!(sink.send("x").is_ok());
        drop(rx);
        assert!(sink.send("y").is_err());
    }
}
