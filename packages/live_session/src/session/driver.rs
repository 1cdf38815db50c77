use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionShared;
use crate::codec;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::Frame;
use crate::transport::{ConnectTarget, Connector, Link, LinkEvent};

/// How a live link ended.
enum LinkEnd {
    /// The session was closed locally
    Cancelled,
    /// The peer closed cleanly; the subject is gone
    RemoteClosed,
    Failed(TransportError),
}

/// Drive one session: connect, serve the link, back off, repeat until
/// cancelled. Expects the session to already be `connecting`.
pub(super) async fn run(
    shared: Arc<SessionShared>,
    connector: Arc<dyn Connector>,
    target: ConnectTarget,
    config: SessionConfig,
) {
    let cancel = shared.cancel.clone();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        debug!(session_id = %shared.id, attempt = shared.attempt(), "connect attempt");
        let connect = tokio::time::timeout(config.connect_timeout, connector.connect(&target));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            res = connect => match res {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(config.connect_timeout)),
            },
        };

        let failure = match result {
            Ok(link) => match serve_link(&shared, link, &cancel, &config).await {
                LinkEnd::Cancelled => return,
                LinkEnd::RemoteClosed => {
                    shared.shutdown("closed by peer");
                    return;
                }
                LinkEnd::Failed(err) => err,
            },
            Err(err) => err,
        };

        let Some(attempt) = shared.mark_failed(&failure) else {
            return;
        };
        let delay = config.backoff.delay_for(attempt);
        info!(session_id = %shared.id, attempt, ?delay, "scheduling reconnect");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        if !shared.mark_retry() {
            return;
        }
    }
}

async fn serve_link(
    shared: &SessionShared,
    mut link: Link,
    cancel: &CancellationToken,
    config: &SessionConfig,
) -> LinkEnd {
    let Some(flush) = shared.mark_connected() else {
        return LinkEnd::Cancelled;
    };
    if let Err(err) = transmit(shared, &link, flush) {
        return LinkEnd::Failed(err);
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return LinkEnd::Cancelled,

            event = link.inbound.recv() => match event {
                Some(LinkEvent::Message(wire)) => shared.receive(&wire),
                Some(LinkEvent::Closed { clean: true, reason }) if !config.reconnect_on_clean_close => {
                    info!(session_id = %shared.id, ?reason, "peer closed session");
                    return LinkEnd::RemoteClosed;
                }
                Some(LinkEvent::Closed { reason, .. }) => {
                    return LinkEnd::Failed(TransportError::Lost(
                        reason.unwrap_or_else(|| "closed by peer".to_string()),
                    ));
                }
                Some(LinkEvent::Failed(err)) => return LinkEnd::Failed(err),
                None => return LinkEnd::Failed(TransportError::Lost("link dropped".to_string())),
            },

            _ = shared.wake.notified() => {
                let frames = shared.take_outbound();
                if let Err(err) = transmit(shared, &link, frames) {
                    return LinkEnd::Failed(err);
                }
            }
        }
    }
}

/// Hand frames to the link in order. Whatever the link refuses goes back to
/// the head of the queue for the next connection.
fn transmit(shared: &SessionShared, link: &Link, frames: Vec<Frame>) -> Result<(), TransportError> {
    let mut pending = frames.into_iter();
    while let Some(frame) = pending.next() {
        let wire = match codec::encode(&frame) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(session_id = %shared.id, frame_type = frame.frame_type(), error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if link.outbound.send(wire).is_err() {
            let mut unsent = vec![frame];
            unsent.extend(pending);
            shared.requeue(unsent);
            return Err(TransportError::Lost("transport writer is gone".to_string()));
        }
        shared.record_sent();
    }
    Ok(())
}
