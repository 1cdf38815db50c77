//! Display Bridges
//!
//! Adapters between a session's event stream and what a particular view
//! renders: a terminal byte stream, a chat timeline, or a log tail. Bridges
//! do no I/O of their own; view actions go out through
//! [`SessionHandle::send`](crate::session::SessionHandle::send).
//!
//! Content-level problems (frames the bridge has no use for, merge
//! conflicts) are handled per frame and never reach the session.

pub mod chat;
pub mod log_tail;
pub mod terminal;

use crate::session::{EventStream, SessionEvent};

pub use chat::ChatBridge;
pub use log_tail::{LogEntry, LogTailBridge};
pub use terminal::{TerminalBridge, TerminalDeck, TerminalSurface};

pub trait DisplayBridge {
    fn handle_event(&mut self, event: SessionEvent);
}

impl<B: DisplayBridge + ?Sized> DisplayBridge for Box<B> {
    fn handle_event(&mut self, event: SessionEvent) {
        (**self).handle_event(event)
    }
}

/// Feed `bridge` from `events` until the session stops delivering. Returns
/// the number of events handled.
pub async fn pump<B: DisplayBridge + ?Sized>(events: &mut EventStream, bridge: &mut B) -> u64 {
    let mut handled = 0;
    while let Some(event) = events.recv().await {
        bridge.handle_event(event);
        handled += 1;
    }
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, SessionKind};
    use crate::registry::SessionRegistry;
    use crate::session::ConnectionState;
    use crate::test_helpers::{MockConnector, test_config, wait_for_state};

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Frame>,
        states: Vec<ConnectionState>,
    }

    impl DisplayBridge for Recorder {
        fn handle_event(&mut self, event: SessionEvent) {
            match event {
                SessionEvent::Frame { frame, .. } => self.frames.push(frame),
                SessionEvent::State(state) => self.states.push(state),
                SessionEvent::OutboundDropped { .. } => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pump_runs_until_release() {
        let connector = MockConnector::accepting();
        let registry = SessionRegistry::new(connector.clone(), test_config());
        let session = registry.acquire("job-3", SessionKind::JobLog);
        let mut events = session.subscribe();

        let pumping = tokio::spawn(async move {
            let mut recorder = Recorder::default();
            let handled = pump(&mut events, &mut recorder).await;
            (handled, recorder)
        });

        let peer = connector.next_peer().await;
        wait_for_state(&session, ConnectionState::Open).await;
        peer.send_raw(r#"{"type":"log","payload":{"message":"build started"}}"#);
        peer.send_raw(r#"{"type":"log","payload":{"message":"build finished"}}"#);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        registry.release("job-3");

        let (handled, recorder) = pumping.await.unwrap();
        assert_eq!(recorder.frames.len(), 2);
        assert_eq!(
            recorder.states,
            vec![ConnectionState::Connecting, ConnectionState::Open]
        );
        assert_eq!(handled, 4);
    }
}
