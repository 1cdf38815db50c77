//! Error taxonomy.
//!
//! Only [`TransportError`] ever changes a session's state. Decode and merge
//! errors are scoped to a single frame and are logged and dropped by the
//! caller.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Connect failures and abnormal closes. Drives a session into `errored`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint is unavailable: {0}")]
    Unavailable(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected => Self::Unavailable(io_err.to_string()),
                _ => Self::Lost(io_err.to_string()),
            },
            tungstenite::Error::Http(resp) => {
                Self::Handshake(format!("server answered {}", resp.status()))
            }
            tungstenite::Error::Url(e) => Self::InvalidEndpoint(e.to_string()),
            tungstenite::Error::HttpFormat(e) => Self::InvalidEndpoint(e.to_string()),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Lost("connection already closed".to_string())
            }
            other => Self::Lost(other.to_string()),
        }
    }
}

/// A single inbound message could not be turned into a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not valid UTF-8")]
    NotUtf8,

    #[error("message is not valid JSON: {0}")]
    Malformed(String),

    #[error("envelope has no string `type` field")]
    MissingType,

    #[error("invalid payload for `{frame_type}`: {reason}")]
    InvalidPayload { frame_type: String, reason: String },
}

/// A delta could not be merged into the timeline. The timeline is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("turn {id} is already finalized")]
    FinalizedTurn { id: String },

    #[error("no in-flight turn matches {}", .id.as_deref().unwrap_or("<none>"))]
    UnknownTurn { id: Option<String> },

    #[error("timeline already seeded")]
    AlreadySeeded,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_io_error_is_unavailable() {
        let err = tungstenite::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        ));
        assert!(matches!(
            TransportError::from_tungstenite(err),
            TransportError::Unavailable(_)
        ));
    }

    #[test]
    fn closed_connection_is_lost() {
        assert!(matches!(
            TransportError::from_tungstenite(tungstenite::Error::ConnectionClosed),
            TransportError::Lost(_)
        ));
    }

    #[test]
    fn unknown_turn_display_without_id() {
        let err = MergeError::UnknownTurn { id: None };
        assert_eq!(err.to_string(), "no in-flight turn matches <none>");
    }
}
