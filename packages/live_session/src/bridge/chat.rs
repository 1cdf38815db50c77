//! Chat Bridge
//!
//! Drives a [`ReconciliationMerger`] from chat frames and local submits.

use tracing::{debug, warn};

use super::DisplayBridge;
use crate::error::MergeError;
use crate::protocol::{ChatMessagePayload, Frame, Role};
use crate::session::{ConnectionState, SessionEvent, SessionHandle};
use crate::timeline::{ReconciliationMerger, TimelineDelta, TimelineItem, new_local_id};

/// Timeline changes carried by one frame, in order.
pub fn deltas_for(frame: &Frame) -> Vec<TimelineDelta> {
    match frame {
        Frame::ChatMessage(msg) => vec![TimelineDelta::Turn {
            id: msg.id.clone(),
            role: msg.role,
            content: msg.content.clone(),
        }],
        Frame::ChatResponse(resp) => {
            let mut deltas = Vec::with_capacity(2);
            if !resp.delta.is_empty() {
                deltas.push(TimelineDelta::Increment {
                    id: resp.id.clone(),
                    role: Role::Assistant,
                    text: resp.delta.clone(),
                });
            }
            if resp.done {
                deltas.push(TimelineDelta::Finalize { id: resp.id.clone() });
            }
            deltas
        }
        Frame::AgentStatusUpdate(update) if update.status.is_terminal() => {
            vec![TimelineDelta::Finalize {
                id: update.id.clone(),
            }]
        }
        _ => Vec::new(),
    }
}

pub struct ChatBridge {
    session: SessionHandle,
    merger: ReconciliationMerger,
    connection: ConnectionState,
    undelivered: Vec<ChatMessagePayload>,
}

impl ChatBridge {
    pub fn new(session: SessionHandle) -> Self {
        let connection = session.state();
        Self {
            session,
            merger: ReconciliationMerger::new(),
            connection,
            undelivered: Vec::new(),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Connectivity as last reported by the session.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn items(&self) -> &[TimelineItem] {
        self.merger.items()
    }

    pub fn merger(&self) -> &ReconciliationMerger {
        &self.merger
    }

    /// Insert the history fetched for this conversation. Frames that arrived
    /// earlier are applied right after it.
    pub fn seed(&mut self, history: Vec<TimelineItem>) -> Result<(), MergeError> {
        self.merger.seed(history)
    }

    /// Append the user's turn and an empty assistant placeholder, then send
    /// the message. Both items are visible on return, even before `seed`.
    /// Returns the id the message was sent with.
    pub fn submit(&mut self, content: &str) -> String {
        let id = new_local_id();
        self.merger.apply_local(TimelineDelta::Turn {
            id: Some(id.clone()),
            role: Role::User,
            content: content.to_string(),
        });
        self.merger.apply_local(TimelineDelta::Placeholder {
            id: None,
            role: Role::Assistant,
        });
        self.session.send(Frame::ChatMessage(ChatMessagePayload {
            id: Some(id.clone()),
            role: Role::User,
            content: content.to_string(),
        }));
        id
    }

    /// Messages the session dropped before they could be sent, oldest first.
    /// The caller decides whether to resend.
    pub fn take_undelivered(&mut self) -> Vec<ChatMessagePayload> {
        std::mem::take(&mut self.undelivered)
    }

    /// Resend a message that was dropped. The timeline already holds it.
    pub fn resend(&self, message: ChatMessagePayload) {
        self.session.send(Frame::ChatMessage(message));
    }
}

impl DisplayBridge for ChatBridge {
    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame { seq, frame } => {
                let deltas = deltas_for(&frame);
                if deltas.is_empty() {
                    debug!(session_id = self.session.id(), frame_type = frame.frame_type(), seq, "no timeline change");
                }
                for delta in deltas {
                    self.merger.apply(delta);
                }
            }
            SessionEvent::State(state) => self.connection = state,
            SessionEvent::OutboundDropped {
                frame: Frame::ChatMessage(message),
            } => {
                warn!(session_id = self.session.id(), message_id = ?message.id, "chat message dropped before sending");
                self.undelivered.push(message);
            }
            SessionEvent::OutboundDropped { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocol::{AgentStatus, ChatResponsePayload, SessionKind, StatusPayload};
    use crate::registry::SessionRegistry;
    use crate::test_helpers::{MockConnector, test_config, wait_for_state};

    fn idle_session(cap: usize) -> SessionHandle {
        let config = SessionConfig {
            outbound_queue_cap: cap,
            ..SessionConfig::default()
        };
        SessionHandle::new_idle("chat-1".into(), SessionKind::Chat, &config)
    }

    fn response(delta: &str, done: bool) -> SessionEvent {
        SessionEvent::Frame {
            seq: 0,
            frame: Frame::ChatResponse(ChatResponsePayload {
                id: None,
                delta: delta.to_string(),
                done,
            }),
        }
    }

    fn seeded_bridge() -> ChatBridge {
        let mut bridge = ChatBridge::new(idle_session(8));
        bridge.seed(Vec::new()).unwrap();
        bridge
    }

    #[test]
    fn submit_shows_user_turn_and_placeholder_immediately() {
        let mut bridge = seeded_bridge();
        let id = bridge.submit("what's the weather?");

        let items = bridge.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].role, Role::User);
        assert!(!items[0].is_placeholder);
        assert_eq!(items[1].role, Role::Assistant);
        assert_eq!(items[1].content, "");
        assert!(items[1].is_placeholder);
        assert_eq!(bridge.session().queued_outbound(), 1);
    }

    #[test]
    fn streamed_tokens_fill_the_placeholder() {
        let mut bridge = seeded_bridge();
        bridge.submit("hi");
        bridge.handle_event(response("Hel", false));
        bridge.handle_event(response("lo ", false));
        bridge.handle_event(response("world", false));
        bridge.handle_event(response("", true));

        let reply = &bridge.items()[1];
        assert_eq!(reply.content, "Hello world");
        assert!(!reply.is_placeholder);
        assert_eq!(bridge.items().len(), 2);
    }

    #[test]
    fn terminal_status_finalizes_and_blocks_late_tokens() {
        let mut bridge = seeded_bridge();
        bridge.submit("go");
        bridge.handle_event(response("done", false));
        bridge.handle_event(SessionEvent::Frame {
            seq: 0,
            frame: Frame::AgentStatusUpdate(StatusPayload {
                id: None,
                status: AgentStatus::Completed,
                message: None,
            }),
        });
        bridge.handle_event(response(" late", false));

        assert_eq!(bridge.items()[1].content, "done");
        assert!(!bridge.items()[1].is_placeholder);
        assert_eq!(bridge.items().len(), 2);
    }

    #[test]
    fn server_echo_of_submit_is_deduplicated() {
        let mut bridge = seeded_bridge();
        let id = bridge.submit("hello");
        bridge.handle_event(SessionEvent::Frame {
            seq: 0,
            frame: Frame::ChatMessage(ChatMessagePayload {
                id: Some(id),
                role: Role::User,
                content: "hello".into(),
            }),
        });
        assert_eq!(bridge.items().len(), 2);
    }

    #[test]
    fn frames_before_history_are_replayed_after_it() {
        let mut bridge = ChatBridge::new(idle_session(8));
        bridge.handle_event(response("partial", false));
        assert!(bridge.items().is_empty());

        bridge
            .seed(vec![TimelineItem::new("h1", Role::User, "earlier")])
            .unwrap();
        let contents: Vec<_> = bridge.items().iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier", "partial"]);
    }

    #[test]
    fn submit_before_history_stays_after_it() {
        let mut bridge = ChatBridge::new(idle_session(8));
        let id = bridge.submit("hi");
        assert_eq!(bridge.items().len(), 2);
        assert!(bridge.items()[1].is_placeholder);

        bridge.handle_event(response("hello", false));
        bridge
            .seed(vec![
                TimelineItem::new("h1", Role::User, "earlier"),
                TimelineItem::new("h2", Role::Assistant, "reply"),
            ])
            .unwrap();

        let items = bridge.items();
        let contents: Vec<_> = items.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier", "reply", "hi", "hello"]);
        assert_eq!(items[2].id, id);
        assert_eq!(items[3].role, Role::Assistant);
        assert!(items[3].is_placeholder);
    }

    #[test]
    fn dropped_messages_are_surfaced() {
        let mut bridge = seeded_bridge();
        let mut events = bridge.session().subscribe();
        let mut ids = Vec::new();
        for n in 0..9 {
            ids.push(bridge.submit(&format!("msg {n}")));
        }
        while let Some(event) = events.try_recv() {
            bridge.handle_event(event);
        }

        let undelivered = bridge.take_undelivered();
        assert_eq!(undelivered.len(), 1);
        assert_eq!(undelivered[0].id.as_deref(), Some(ids[0].as_str()));
        assert!(bridge.take_undelivered().is_empty());
    }

    #[test]
    fn unrelated_frames_change_nothing() {
        assert!(deltas_for(&Frame::ShellOutput("x".into())).is_empty());
        assert!(
            deltas_for(&Frame::AgentStatusUpdate(StatusPayload {
                id: None,
                status: AgentStatus::Running,
                message: None,
            }))
            .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submit_reaches_the_wire_with_local_id() {
        let connector = MockConnector::accepting();
        let registry = SessionRegistry::new(connector.clone(), test_config());
        let session = registry.acquire("chat-9", SessionKind::Chat);
        let mut bridge = ChatBridge::new(session.clone());
        bridge.seed(Vec::new()).unwrap();

        let id = bridge.submit("ping");
        let mut peer = connector.next_peer().await;
        wait_for_state(&session, ConnectionState::Open).await;

        match peer.recv_frame().await {
            Frame::ChatMessage(msg) => {
                assert_eq!(msg.id.as_deref(), Some(id.as_str()));
                assert_eq!(msg.content, "ping");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
