//! Frame Types
//!
//! The closed set of frame types exchanged with the backend, one variant per
//! wire tag, plus an `Unknown` variant so newer servers never break older
//! clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The logical subject a session streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    Shell,
    Chat,
    JobLog,
    Telemetry,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Shell => "shell",
            SessionKind::Chat => "chat",
            SessionKind::JobLog => "job-log",
            SessionKind::Telemetry => "telemetry",
        }
    }

    /// Whether frames of this type belong to this kind's protocol.
    pub fn accepts(&self, frame: &Frame) -> bool {
        match self {
            SessionKind::Shell => matches!(
                frame,
                Frame::ShellInput(_) | Frame::ShellOutput(_) | Frame::ShellResize(_)
            ),
            SessionKind::Chat => matches!(
                frame,
                Frame::ChatMessage(_)
                    | Frame::ChatResponse(_)
                    | Frame::AgentStatusUpdate(_)
                    | Frame::AgentLog(_)
            ),
            SessionKind::JobLog => matches!(
                frame,
                Frame::AgentLog(_) | Frame::Log(_) | Frame::AgentStatusUpdate(_)
            ),
            SessionKind::Telemetry => matches!(frame, Frame::Telemetry(_) | Frame::Log(_)),
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(SessionKind::Shell),
            "chat" => Ok(SessionKind::Chat),
            "job-log" | "job_log" => Ok(SessionKind::JobLog),
            "telemetry" => Ok(SessionKind::Telemetry),
            other => Err(format!("unknown session kind: {other}")),
        }
    }
}

/// Terminal dimensions carried by `shell_resize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

/// Who authored a chat turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
    Tool,
}

/// A complete chat turn (`chat_message`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

/// Streamed generation tokens for the in-flight turn (`chat_response`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "content")]
    pub delta: String,
    /// Set on the last increment of a turn
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Queued,
    Running,
    Thinking,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Other,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Queued => "queued",
            AgentStatus::Running => "running",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
            AgentStatus::Other => "other",
        }
    }

    /// Completed, failed and cancelled end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Cancelled
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One log line (`agent_log` and `log`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One typed message unit exchanged over a streaming connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Keystrokes or paste, raw bytes as text
    ShellInput(String),
    /// Terminal output, raw bytes as text
    ShellOutput(String),
    ShellResize(TerminalSize),
    ChatMessage(ChatMessagePayload),
    ChatResponse(ChatResponsePayload),
    AgentLog(LogPayload),
    AgentStatusUpdate(StatusPayload),
    Telemetry(serde_json::Value),
    Log(LogPayload),
    /// A tag this client does not know. Preserved verbatim.
    Unknown {
        frame_type: String,
        payload: serde_json::Value,
    },
}

impl Frame {
    pub fn frame_type(&self) -> &str {
        match self {
            Frame::ShellInput(_) => "shell_input",
            Frame::ShellOutput(_) => "shell_output",
            Frame::ShellResize(_) => "shell_resize",
            Frame::ChatMessage(_) => "chat_message",
            Frame::ChatResponse(_) => "chat_response",
            Frame::AgentLog(_) => "agent_log",
            Frame::AgentStatusUpdate(_) => "agent_status_update",
            Frame::Telemetry(_) => "telemetry",
            Frame::Log(_) => "log",
            Frame::Unknown { frame_type, .. } => frame_type,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Frame::Unknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_kind_serde_is_kebab_case() {
        let json = serde_json::to_value(SessionKind::JobLog).unwrap();
        assert_eq!(json, "job-log");
        let kind: SessionKind = serde_json::from_value(json).unwrap();
        assert_eq!(kind, SessionKind::JobLog);
    }

    #[test]
    fn session_kind_from_str() {
        assert_eq!("shell".parse::<SessionKind>(), Ok(SessionKind::Shell));
        assert_eq!("job_log".parse::<SessionKind>(), Ok(SessionKind::JobLog));
        assert!("device".parse::<SessionKind>().is_err());
    }

    #[test]
    fn shell_kind_rejects_chat_frames() {
        let frame = Frame::ChatMessage(ChatMessagePayload {
            id: None,
            role: Role::User,
            content: "hi".into(),
        });
        assert!(!SessionKind::Shell.accepts(&frame));
        assert!(SessionKind::Chat.accepts(&frame));
    }

    #[test]
    fn unknown_frames_belong_to_no_kind() {
        let frame = Frame::Unknown {
            frame_type: "heartbeat".into(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(frame.frame_type(), "heartbeat");
        for kind in [
            SessionKind::Shell,
            SessionKind::Chat,
            SessionKind::JobLog,
            SessionKind::Telemetry,
        ] {
            assert!(!kind.accepts(&frame));
        }
    }

    #[test]
    fn chat_response_accepts_content_alias() {
        let payload: ChatResponsePayload =
            serde_json::from_str(r#"{"content":"Hel"}"#).unwrap();
        assert_eq!(payload.delta, "Hel");
        assert!(!payload.done);
        assert!(payload.id.is_none());
    }

    #[test]
    fn unrecognized_status_maps_to_other() {
        let payload: StatusPayload = serde_json::from_str(r#"{"status":"paused"}"#).unwrap();
        assert_eq!(payload.status, AgentStatus::Other);
        assert!(!payload.status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(AgentStatus::Cancelled.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
    }
}
