//! `tether` Core Library
//!
//! Shared functionality for `tether` components:
//! - NDJSON line decoding and parsing for the Claude Code stream-json protocol
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod ndjson;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
