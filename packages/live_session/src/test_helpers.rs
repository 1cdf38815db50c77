use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::{self, WireMessage};
use crate::config::SessionConfig;
use crate::backoff::BackoffPolicy;
use crate::error::TransportError;
use crate::protocol::Frame;
use crate::session::{ConnectionState, SessionHandle};
use crate::transport::{ConnectTarget, Connector, Link, LinkEvent};

/// What the next connect attempt does.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Never completes
    Hang,
}

/// Server side of an accepted mock link.
pub struct PeerEnd {
    pub target: ConnectTarget,
    pub to_client: mpsc::UnboundedSender<LinkEvent>,
    pub from_client: mpsc::UnboundedReceiver<WireMessage>,
}

impl PeerEnd {
    pub fn send_frame(&self, frame: &Frame) {
        let wire = codec::encode(frame).expect("encode");
        self.to_client
            .send(LinkEvent::Message(wire))
            .expect("client link gone");
    }

    pub fn send_raw(&self, text: &str) {
        self.to_client
            .send(LinkEvent::Message(WireMessage::Text(text.to_string())))
            .expect("client link gone");
    }

    pub fn fail(&self) {
        let _ = self
            .to_client
            .send(LinkEvent::Failed(TransportError::Lost("peer reset".into())));
    }

    pub fn close_clean(&self) {
        let _ = self.to_client.send(LinkEvent::Closed {
            clean: true,
            reason: None,
        });
    }

    /// Next frame the client sent, decoded.
    pub async fn recv_frame(&mut self) -> Frame {
        let wire = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client link closed");
        codec::decode(&wire).expect("decode")
    }
}

/// Scripted in-memory connector. Attempts not covered by the script accept.
pub struct MockConnector {
    attempts: AtomicUsize,
    script: Mutex<VecDeque<Outcome>>,
    peers_tx: mpsc::UnboundedSender<PeerEnd>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerEnd>>,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            script: Mutex::new(script.into_iter().collect()),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new([])
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted link.
    pub async fn next_peer(&self) -> PeerEnd {
        let mut rx = self.peers_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

impl Connector for MockConnector {
    fn connect(&self, target: &ConnectTarget) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let _ = self.peers_tx.send(PeerEnd {
                    target: target.clone(),
                    to_client,
                    from_client,
                });
                Box::pin(async move { Ok(Link { outbound, inbound }) })
            }
            Outcome::Refuse => Box::pin(async {
                Err(TransportError::Unavailable("connection refused".into()))
            }),
            Outcome::Hang => Box::pin(futures::future::pending()),
        }
    }
}

/// Session config with deterministic, short backoff.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        backoff: BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: 0.0,
        },
        connect_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    }
}

pub async fn wait_for_state(session: &SessionHandle, target: ConnectionState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}, still {}", session.state()))
        .expect("state channel closed");
}
