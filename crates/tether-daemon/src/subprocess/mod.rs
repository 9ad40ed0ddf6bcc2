//! Subprocess management for Claude Code processes.

mod handle;
mod spawner;

pub use handle::{BoxedReader, BoxedWriter, ProcessHandle};
pub use spawner::{ClaudeSpawner, ProcessSpawner, SpawnConfig, SubprocessError};
