//! NDJSON handling for the Claude Code stream-json protocol.
//!
//! Decodes newline-delimited output from the subprocess's stdout and parses
//! each line into canonical message types, implementing a tolerant reader
//! pattern.

mod decoder;
mod parser;
mod types;

pub use decoder::{Frame, LineDecoder, MAX_LINE_BYTES};
pub use parser::{parse_line, parse_value};
pub use types::*;
