use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    http::{HeaderValue, header::AUTHORIZATION},
    protocol::frame::coding::CloseCode,
};
use tracing::{debug, warn};

use super::{ConnectTarget, Connector, Link, LinkEvent};
use crate::codec::WireMessage;
use crate::error::TransportError;

/// Connects sessions over WebSocket.
///
/// The endpoint comes from a template with `{kind}` and `{subject}`
/// placeholders, e.g. `wss://host/api/{kind}/{subject}/ws`. Both are
/// substituted as single percent-encoded path segments.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url_template: String,
}

impl WebSocketConnector {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    pub fn endpoint_for(&self, target: &ConnectTarget) -> String {
        self.url_template
            .replace("{kind}", &urlencoding::encode(target.kind.as_str()))
            .replace("{subject}", &urlencoding::encode(&target.subject_id))
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = self.endpoint_for(target);
        let token = target.auth_token.clone();
        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(TransportError::from_tungstenite)?;
            if let Some(token) = token {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }

            debug!(%url, "opening websocket");
            let (ws_stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(TransportError::from_tungstenite)?;
            Ok(spawn_pump(ws_stream))
        })
    }
}

/// Split the socket into a writer task fed by `Link::outbound` and a reader
/// task feeding `Link::inbound`.
fn spawn_pump<S>(ws_stream: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let msg = match msg {
                WireMessage::Text(text) => Message::Text(text.into()),
                WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
            };
            if let Err(e) = ws_write.send(msg).await {
                debug!(error = %e, "websocket write failed");
                return;
            }
        }
        // Session dropped its sender: close politely
        let _ = ws_write.send(Message::Close(None)).await;
        let _ = ws_write.close().await;
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_read.next().await {
            let event = match msg {
                Ok(Message::Text(text)) => {
                    LinkEvent::Message(WireMessage::Text(text.as_str().to_owned()))
                }
                Ok(Message::Binary(bytes)) => LinkEvent::Message(WireMessage::Binary(bytes.to_vec())),
                Ok(Message::Close(frame)) => {
                    let clean = frame
                        .as_ref()
                        .is_none_or(|f| f.code == CloseCode::Normal);
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    let _ = in_tx.send(LinkEvent::Closed { clean, reason });
                    return;
                }
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => {
                    let _ = in_tx.send(LinkEvent::Closed {
                        clean: true,
                        reason: None,
                    });
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "websocket read failed");
                    let _ = in_tx.send(LinkEvent::Failed(TransportError::from_tungstenite(e)));
                    return;
                }
            };
            if in_tx.send(event).is_err() {
                return;
            }
        }
        let _ = in_tx.send(LinkEvent::Failed(TransportError::Lost(
            "stream ended without a close frame".to_string(),
        )));
    });

    Link {
        outbound: out_tx,
        inbound: in_rx,
    }
}
