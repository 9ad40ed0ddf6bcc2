//! Session management.
//!
//! Owns the table of live sessions, one runner per session, and routes
//! caller turns to the right runner.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{ManagerConfig, Session, SessionError, SessionOptions};
