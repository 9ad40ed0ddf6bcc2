//! Message types for the Claude Code stream-json protocol.

use serde::Serialize;

/// Inbound messages emitted on the subprocess's stdout.
///
/// Only the fields the session runner needs are modelled; everything else on
/// the wire is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `{"type":"system","subtype":"init",...}`, first line of every turn.
    SystemInit(SystemInit),
    /// Any other `system` subtype.
    System {
        subtype: String,
        session_id: Option<String>,
    },
    Assistant(AssistantFragment),
    Result(SessionResult),
    Unknown {
        msg_type: String,
        session_id: Option<String>,
    },
}

impl Message {
    /// Session id carried by the message, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SystemInit(init) => Some(&init.session_id),
            Self::Assistant(fragment) => fragment.session_id.as_deref(),
            Self::Result(result) => Some(&result.session_id),
            Self::System { session_id, .. } | Self::Unknown { session_id, .. } => {
                session_id.as_deref()
            }
        }
    }
}

/// System initialization message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInit {
    pub session_id: String,
    pub model: Option<String>,
    pub cwd: Option<String>,
}

/// One `assistant` message reduced to its first text fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantFragment {
    pub session_id: Option<String>,
    /// Text of the first content block carrying a `text` string.
    pub fragment: Option<String>,
}

/// Terminal message for a session's current turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub session_id: String,
    pub is_error: bool,
    /// Final text, used as a fallback reply or as the error message.
    pub result: Option<String>,
    pub subtype: Option<String>,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Outbound user turn written to the subprocess's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTurn {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct UserContent {
    role: &'static str,
    content: String,
}

impl UserTurn {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "user",
            message: UserContent {
                role: "user",
                content: text.into(),
            },
        }
    }

    /// Text content of the turn.
    pub fn text(&self) -> &str {
        &self.message.content
    }

    /// Serialize as a single protocol line terminated by `\n`.
    pub fn to_line(&self) -> crate::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn user_turn_serializes_to_wire_shape() {
        let line = UserTurn::new("What is 2+2?").to_line().unwrap();
        assert_eq!(
            line,
            "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"What is 2+2?\"}}\n"
        );
    }

    #[test]
    fn user_turn_escapes_newlines_in_content() {
        let turn = UserTurn::new("a\nb");
        assert_eq!(turn.text(), "a\nb");
        let line = turn.to_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
    }
}
