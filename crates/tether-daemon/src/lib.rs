//! tether daemon library
//!
//! Core functionality behind the `tether` binary:
//! - Subprocess spawning for Claude Code in stream-json mode
//! - Session runners that correlate turns with protocol output
//! - Session management and turn routing

pub mod runner;
pub mod session;
pub mod subprocess;

#[cfg(test)]
mod test_support;
