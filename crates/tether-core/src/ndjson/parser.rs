//! NDJSON parser for the stream-json protocol.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! surfaced as [`Message::Unknown`].

use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Parse a single NDJSON line from the subprocess's stdout.
pub fn parse_line(line: &str) -> Result<Message> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into a canonical message.
pub fn parse_value(raw: &Value) -> Result<Message> {
    if !raw.is_object() {
        return Err(Error::NdjsonParse("Expected a JSON object".into()));
    }

    let msg_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::NdjsonParse("Missing 'type' field".into()))?;

    match msg_type {
        "system" => parse_system(raw),
        "assistant" => Ok(parse_assistant(raw)),
        "result" => parse_result(raw),
        _ => Ok(Message::Unknown {
            msg_type: msg_type.to_string(),
            session_id: str_field(raw, "session_id"),
        }),
    }
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn parse_system(raw: &Value) -> Result<Message> {
    let subtype = raw.get("subtype").and_then(|v| v.as_str()).unwrap_or("");

    if subtype != "init" {
        return Ok(Message::System {
            subtype: subtype.to_string(),
            session_id: str_field(raw, "session_id"),
        });
    }

    let session_id = str_field(raw, "session_id")
        .ok_or_else(|| Error::NdjsonParse("system init without 'session_id'".into()))?;

    Ok(Message::SystemInit(SystemInit {
        session_id,
        model: str_field(raw, "model"),
        cwd: str_field(raw, "cwd"),
    }))
}

fn parse_assistant(raw: &Value) -> Message {
    let fragment = raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_array())
        .and_then(|blocks| {
            blocks
                .iter()
                .find_map(|block| block.get("text").and_then(|t| t.as_str()))
        })
        .map(String::from);

    Message::Assistant(AssistantFragment {
        session_id: str_field(raw, "session_id"),
        fragment,
    })
}

fn parse_result(raw: &Value) -> Result<Message> {
    let session_id = str_field(raw, "session_id")
        .ok_or_else(|| Error::NdjsonParse("result without 'session_id'".into()))?;

    Ok(Message::Result(SessionResult {
        session_id,
        is_error: raw
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        result: str_field(raw, "result"),
        subtype: str_field(raw, "subtype"),
        duration_ms: raw.get("duration_ms").and_then(|v| v.as_u64()),
        cost_usd: raw.get("total_cost_usd").and_then(|v| v.as_f64()),
    }))
}
