//! Terminal Bridge
//!
//! Maps `shell_output` into an emulator and keystrokes/resizes back into
//! frames. A [`TerminalDeck`] owns the single render surface and hands it to
//! whichever bridge is visible; the others keep buffering in the background.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::DisplayBridge;
use crate::config::BridgeLimits;
use crate::protocol::{Frame, TerminalSize};
use crate::session::{ConnectionState, SessionEvent, SessionHandle};

/// The emulator a bridge renders into. Painting glyphs is its business.
pub trait TerminalSurface: Send {
    /// Append raw output.
    fn write(&mut self, data: &str);

    /// Clear everything, ready to show a different session.
    fn reset(&mut self);
}

/// Append `data` and drop the oldest bytes beyond `cap`, keeping char
/// boundaries intact. Returns true if anything was dropped.
fn append_bounded(buf: &mut String, data: &str, cap: usize) -> bool {
    buf.push_str(data);
    if buf.len() <= cap {
        return false;
    }
    let mut cut = buf.len() - cap;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
    true
}

pub struct TerminalBridge {
    session: SessionHandle,
    surface: Option<Box<dyn TerminalSurface>>,
    scrollback: String,
    /// Output received while detached
    unseen: String,
    /// `unseen` lost bytes; a resume has to replay the scrollback instead
    unseen_truncated: bool,
    cap: usize,
    pending_resize: Option<TerminalSize>,
    size: Option<TerminalSize>,
    dropped_inputs: u64,
}

impl TerminalBridge {
    pub fn new(session: SessionHandle, scrollback_bytes: usize) -> Self {
        Self {
            session,
            surface: None,
            scrollback: String::new(),
            unseen: String::new(),
            unseen_truncated: false,
            cap: scrollback_bytes.max(1),
            pending_resize: None,
            size: None,
            dropped_inputs: 0,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    /// Everything retained for this terminal, oldest first.
    pub fn scrollback(&self) -> &str {
        &self.scrollback
    }

    /// Bytes received since the bridge was last visible.
    pub fn unseen_bytes(&self) -> usize {
        self.unseen.len()
    }

    /// Last size sent to the backend.
    pub fn size(&self) -> Option<TerminalSize> {
        self.size
    }

    pub fn dropped_inputs(&self) -> u64 {
        self.dropped_inputs
    }

    /// Take over `surface`, clearing it and replaying the scrollback.
    pub fn attach(&mut self, mut surface: Box<dyn TerminalSurface>) {
        surface.reset();
        surface.write(&self.scrollback);
        self.unseen.clear();
        self.unseen_truncated = false;
        self.surface = Some(surface);
    }

    /// Take over a surface that still shows this terminal's earlier output,
    /// writing only what arrived in between.
    pub fn resume(&mut self, mut surface: Box<dyn TerminalSurface>) {
        if self.unseen_truncated {
            debug!(session_id = self.session.id(), "unseen output overflowed, replaying scrollback");
            self.attach(surface);
            return;
        }
        surface.write(&self.unseen);
        self.unseen.clear();
        self.surface = Some(surface);
    }

    /// Give the surface back. Output keeps accumulating while detached.
    pub fn detach(&mut self) -> Option<Box<dyn TerminalSurface>> {
        self.surface.take()
    }

    /// Keystrokes or pasted text.
    pub fn input(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        self.session.send(Frame::ShellInput(data.to_string()));
    }

    /// Emulator resized. Sent right away while open; otherwise only the most
    /// recent size is kept and sent once the session is open again.
    pub fn resize(&mut self, size: TerminalSize) {
        if self.session.state() == ConnectionState::Open {
            self.pending_resize = None;
            self.send_resize(size);
        } else {
            debug!(session_id = self.session.id(), rows = size.rows, cols = size.cols, "resize deferred until open");
            self.pending_resize = Some(size);
        }
    }

    fn send_resize(&mut self, size: TerminalSize) {
        self.size = Some(size);
        self.session.send(Frame::ShellResize(size));
    }

    fn output(&mut self, data: &str) {
        append_bounded(&mut self.scrollback, data, self.cap);
        match self.surface.as_mut() {
            Some(surface) => surface.write(data),
            None => {
                if append_bounded(&mut self.unseen, data, self.cap) {
                    self.unseen_truncated = true;
                }
            }
        }
    }
}

impl DisplayBridge for TerminalBridge {
    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame {
                frame: Frame::ShellOutput(data),
                ..
            } => self.output(&data),
            SessionEvent::Frame { frame, seq } => {
                debug!(session_id = self.session.id(), frame_type = frame.frame_type(), seq, "ignored by terminal");
            }
            SessionEvent::State(ConnectionState::Open) => {
                if let Some(size) = self.pending_resize.take() {
                    self.send_resize(size);
                }
            }
            SessionEvent::State(_) => {}
            SessionEvent::OutboundDropped { frame } => {
                if matches!(frame, Frame::ShellInput(_)) {
                    self.dropped_inputs += 1;
                    warn!(session_id = self.session.id(), "terminal input dropped while disconnected");
                }
            }
        }
    }
}

/// A set of terminal bridges sharing one render surface. At most one bridge
/// holds the surface at a time.
pub struct TerminalDeck {
    /// The surface while no bridge holds it
    parked: Option<Box<dyn TerminalSurface>>,
    bridges: HashMap<String, TerminalBridge>,
    visible: Option<String>,
    /// Whose output the surface currently shows
    on_surface: Option<String>,
    scrollback_bytes: usize,
}

impl TerminalDeck {
    pub fn new(surface: Box<dyn TerminalSurface>, limits: &BridgeLimits) -> Self {
        Self {
            parked: Some(surface),
            bridges: HashMap::new(),
            visible: None,
            on_surface: None,
            scrollback_bytes: limits.terminal_scrollback_bytes,
        }
    }

    /// Register a session's terminal. Returns the existing bridge if the
    /// same session is already present.
    pub fn add(&mut self, session: SessionHandle) -> &mut TerminalBridge {
        let id = session.id().to_string();
        let replace = self
            .bridges
            .get(&id)
            .is_some_and(|existing| !existing.session().same_session(&session));
        if replace {
            self.remove(&id);
        }
        let cap = self.scrollback_bytes;
        self.bridges
            .entry(id)
            .or_insert_with(|| TerminalBridge::new(session, cap))
    }

    /// Forget a terminal, reclaiming the surface if it was visible.
    pub fn remove(&mut self, id: &str) -> Option<TerminalBridge> {
        if self.visible.as_deref() == Some(id) {
            self.hide();
        }
        if self.on_surface.as_deref() == Some(id) {
            self.on_surface = None;
        }
        self.bridges.remove(id)
    }

    /// Make `id` the visible terminal. Returns false if unknown.
    pub fn show(&mut self, id: &str) -> bool {
        if self.visible.as_deref() == Some(id) {
            return true;
        }
        if !self.bridges.contains_key(id) {
            return false;
        }
        self.hide();
        let Some(surface) = self.parked.take() else {
            warn!(session_id = id, "terminal surface missing");
            return false;
        };
        let continuing = self.on_surface.as_deref() == Some(id);
        if let Some(bridge) = self.bridges.get_mut(id) {
            if continuing {
                bridge.resume(surface);
            } else {
                bridge.attach(surface);
            }
        }
        self.visible = Some(id.to_string());
        self.on_surface = Some(id.to_string());
        true
    }

    /// Detach the visible terminal. Its session keeps running.
    pub fn hide(&mut self) {
        let Some(id) = self.visible.take() else {
            return;
        };
        if let Some(surface) = self.bridges.get_mut(&id).and_then(TerminalBridge::detach) {
            self.parked = Some(surface);
        }
    }

    pub fn visible(&self) -> Option<&str> {
        self.visible.as_deref()
    }

    pub fn bridge(&self, id: &str) -> Option<&TerminalBridge> {
        self.bridges.get(id)
    }

    pub fn bridge_mut(&mut self, id: &str) -> Option<&mut TerminalBridge> {
        self.bridges.get_mut(id)
    }

    /// Route a session event to its terminal.
    pub fn handle_event(&mut self, id: &str, event: SessionEvent) {
        match self.bridges.get_mut(id) {
            Some(bridge) => bridge.handle_event(event),
            None => debug!(session_id = id, "event for unknown terminal"),
        }
    }

    /// Drop terminals whose sessions have closed. Returns their ids.
    pub fn prune_closed(&mut self) -> Vec<String> {
        let closed: Vec<String> = self
            .bridges
            .iter()
            .filter(|(_, b)| b.session().state() == ConnectionState::Closed)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &closed {
            self.remove(id);
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::protocol::SessionKind;
    use crate::registry::SessionRegistry;
    use crate::test_helpers::{MockConnector, test_config, wait_for_state};
    use std::sync::{Arc, Mutex};

    /// Records what is on screen since the last reset.
    #[derive(Clone, Default)]
    struct Screen(Arc<Mutex<String>>);

    impl Screen {
        fn text(&self) -> String {
            self.0.lock().unwrap().clone()
        }
    }

    impl TerminalSurface for Screen {
        fn write(&mut self, data: &str) {
            self.0.lock().unwrap().push_str(data);
        }

        fn reset(&mut self) {
            self.0.lock().unwrap().clear();
        }
    }

    fn idle_session(id: &str) -> SessionHandle {
        SessionHandle::new_idle(id.to_string(), SessionKind::Shell, &SessionConfig::default())
    }

    fn out(seq: u64, data: &str) -> SessionEvent {
        SessionEvent::Frame {
            seq,
            frame: Frame::ShellOutput(data.to_string()),
        }
    }

    fn limits(bytes: usize) -> BridgeLimits {
        BridgeLimits {
            log_tail_max_items: 100,
            terminal_scrollback_bytes: bytes,
        }
    }

    #[test]
    fn switching_tabs_loses_no_output() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen.clone()), &limits(4096));
        deck.add(idle_session("a"));
        deck.add(idle_session("b"));

        assert!(deck.show("a"));
        deck.handle_event("a", out(1, "a1 "));
        assert!(deck.show("b"));
        deck.handle_event("a", out(2, "a2 "));
        deck.handle_event("b", out(1, "b1 "));
        deck.handle_event("a", out(3, "a3 "));
        assert_eq!(screen.text(), "b1 ");
        assert_eq!(deck.bridge("a").unwrap().unseen_bytes(), 6);

        assert!(deck.show("a"));
        deck.handle_event("a", out(4, "a4"));

        // Same as if "a" had stayed visible the whole time
        assert_eq!(screen.text(), "a1 a2 a3 a4");
        assert_eq!(deck.bridge("a").unwrap().unseen_bytes(), 0);
    }

    #[test]
    fn only_one_bridge_holds_the_surface() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen), &limits(4096));
        deck.add(idle_session("a"));
        deck.add(idle_session("b"));

        deck.show("a");
        deck.show("b");
        assert!(!deck.bridge("a").unwrap().is_attached());
        assert!(deck.bridge("b").unwrap().is_attached());
        assert_eq!(deck.visible(), Some("b"));
        assert!(!deck.show("missing"));
        assert_eq!(deck.visible(), Some("b"));
    }

    #[test]
    fn hide_and_show_resumes_without_replay() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen.clone()), &limits(4096));
        deck.add(idle_session("a"));

        deck.show("a");
        deck.handle_event("a", out(1, "one "));
        deck.hide();
        deck.handle_event("a", out(2, "two"));
        assert_eq!(screen.text(), "one ");

        deck.show("a");
        assert_eq!(screen.text(), "one two");
    }

    #[test]
    fn overflowed_unseen_output_falls_back_to_scrollback() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen.clone()), &limits(8));
        deck.add(idle_session("a"));

        deck.show("a");
        deck.handle_event("a", out(1, "abc"));
        deck.hide();
        deck.handle_event("a", out(2, "0123456789"));
        deck.show("a");
        assert_eq!(screen.text(), "23456789");
    }

    #[test]
    fn scrollback_trims_on_char_boundary() {
        let mut buf = String::new();
        append_bounded(&mut buf, "héllo", 4);
        assert_eq!(buf, "llo");
        assert!(!append_bounded(&mut buf, "!", 4));
        assert_eq!(buf, "llo!");
    }

    #[test]
    fn remove_visible_parks_surface() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen.clone()), &limits(4096));
        deck.add(idle_session("a"));
        deck.add(idle_session("b"));
        deck.handle_event("b", out(1, "bee"));

        deck.show("a");
        assert!(deck.remove("a").is_some());
        assert_eq!(deck.visible(), None);
        assert!(deck.show("b"));
        assert_eq!(screen.text(), "bee");
    }

    #[test]
    fn closed_sessions_are_pruned() {
        let screen = Screen::default();
        let mut deck = TerminalDeck::new(Box::new(screen), &limits(4096));
        let a = idle_session("a");
        deck.add(a.clone());
        deck.add(idle_session("b"));
        deck.show("a");

        a.close();
        assert_eq!(deck.prune_closed(), vec!["a".to_string()]);
        assert!(deck.bridge("a").is_none());
        assert!(deck.show("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn resizes_while_reconnecting_are_coalesced() {
        let connector = MockConnector::accepting();
        let registry = SessionRegistry::new(connector.clone(), test_config());
        let session = registry.acquire("tab-1", SessionKind::Shell);
        let mut bridge = TerminalBridge::new(session.clone(), 1024);
        let mut events = session.subscribe();

        bridge.resize(TerminalSize { rows: 24, cols: 80 });
        bridge.resize(TerminalSize { rows: 30, cols: 100 });
        bridge.resize(TerminalSize { rows: 40, cols: 120 });
        assert_eq!(session.queued_outbound(), 0);

        let mut peer = connector.next_peer().await;
        wait_for_state(&session, ConnectionState::Open).await;
        while let Some(event) = events.try_recv() {
            bridge.handle_event(event);
        }

        assert_eq!(
            peer.recv_frame().await,
            Frame::ShellResize(TerminalSize { rows: 40, cols: 120 })
        );
        assert_eq!(bridge.size(), Some(TerminalSize { rows: 40, cols: 120 }));

        bridge.input("ls\r");
        assert_eq!(peer.recv_frame().await, Frame::ShellInput("ls\r".into()));

        // Open: sent immediately, nothing left pending
        bridge.resize(TerminalSize { rows: 50, cols: 132 });
        assert_eq!(
            peer.recv_frame().await,
            Frame::ShellResize(TerminalSize { rows: 50, cols: 132 })
        );
    }

    #[test]
    fn dropped_input_is_counted() {
        let mut bridge = TerminalBridge::new(idle_session("a"), 64);
        bridge.handle_event(SessionEvent::OutboundDropped {
            frame: Frame::ShellInput("x".into()),
        });
        bridge.handle_event(SessionEvent::OutboundDropped {
            frame: Frame::ShellResize(TerminalSize { rows: 1, cols: 1 }),
        });
        assert_eq!(bridge.dropped_inputs(), 1);
    }
}
