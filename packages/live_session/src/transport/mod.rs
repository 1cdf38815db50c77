//! Transport seam.
//!
//! A [`Connector`] turns a [`ConnectTarget`] into a [`Link`]: a pair of
//! channels carrying raw [`WireMessage`]s out and [`LinkEvent`]s in. The
//! session driver only ever talks to links, so tests can substitute an
//! in-memory connector for the WebSocket one.
//!
//! Submodules:
//! - `websocket`: tokio-tungstenite connector

use futures::future::BoxFuture;
use std::fmt;
use tokio::sync::mpsc;

use crate::codec::WireMessage;
use crate::error::TransportError;
use crate::protocol::SessionKind;

pub mod websocket;

pub use websocket::WebSocketConnector;

/// Addressing for one streaming connection.
#[derive(Clone)]
pub struct ConnectTarget {
    pub kind: SessionKind,
    pub subject_id: String,
    /// Opaque credential, handed to the transport at connect time only
    pub auth_token: Option<String>,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("kind", &self.kind)
            .field("subject_id", &self.subject_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Something delivered by a live link.
#[derive(Debug)]
pub enum LinkEvent {
    Message(WireMessage),
    /// The peer closed the connection. `clean` is true for a normal close.
    Closed { clean: bool, reason: Option<String> },
    Failed(TransportError),
}

/// An established connection.
///
/// Dropping `outbound` asks the transport to close the connection.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<WireMessage>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, Result<Link, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let target = ConnectTarget {
            kind: SessionKind::Chat,
            subject_id: "job-7".into(),
            auth_token: Some("s3cret".into()),
        };
        let debug = format!("{target:?}");
        assert!(debug.contains("job-7"));
        assert!(!debug.contains("s3cret"));
    }
}
