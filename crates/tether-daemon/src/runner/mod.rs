//! Session runner: drives one stream-json subprocess.
//!
//! The runner owns the subprocess's stdin, correlates `init`/`assistant`/
//! `result` lines with the turns waiting on them, and fans every raw line
//! out to registered observers. Callers talk to it through
//! [`RunnerHandle`].

mod actor;
mod handle;
mod observer;
mod pending;
mod pump;
mod types;


pub use handle::{ObserverSubscription, PendingTurn, RunnerHandle};
pub use observer::{ChannelObserver, ObserverError, ObserverSink};
pub use types::{ObserverId, RunnerState, TurnError, TurnReply};
