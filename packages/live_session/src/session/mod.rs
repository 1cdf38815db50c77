//! Session
//!
//! One logical streaming connection: a cloneable [`SessionHandle`] over
//! shared state, plus a spawned driver task that connects, flushes, receives
//! and backs off. Everything inbound reaches consumers through a single
//! [`EventStream`] per subscriber, in transport delivery order.

mod driver;
pub mod machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, WireMessage};
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::protocol::{Frame, SessionKind};
use crate::transport::{ConnectTarget, Connector};

pub use machine::{ConnectionState, InvalidTransition, SessionMachine};

/// What a subscriber sees.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Connectivity status changed
    State(ConnectionState),
    /// A decoded inbound frame with its local arrival sequence number
    Frame { seq: u64, frame: Frame },
    /// An outbound frame was dropped because the queue was full. The caller
    /// decides whether to resend.
    OutboundDropped { frame: Frame },
}

/// Per-session counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub decode_errors: AtomicU64,
    pub unhandled_frames: AtomicU64,
    pub outbound_dropped: AtomicU64,
    pub reconnects: AtomicU64,
}

impl SessionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unhandled_frames: self.unhandled_frames.load(Ordering::Relaxed),
            outbound_dropped: self.outbound_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of session counters (for serialization/logging)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub decode_errors: u64,
    pub unhandled_frames: u64,
    pub outbound_dropped: u64,
    pub reconnects: u64,
}

struct Core {
    machine: SessionMachine,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    /// Events emitted before anyone subscribed
    backlog: VecDeque<SessionEvent>,
    subscribed: bool,
}

impl Core {
    fn emit(&mut self, event: SessionEvent, backlog_cap: usize) {
        if !self.subscribed {
            if self.backlog.len() >= backlog_cap {
                self.backlog.pop_front();
                warn!(backlog_cap, "event backlog full, dropping oldest event");
            }
            self.backlog.push_back(event);
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

pub(crate) struct SessionShared {
    id: String,
    kind: SessionKind,
    core: Mutex<Core>,
    /// Wakes the driver when outbound frames are queued
    wake: Notify,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    stats: SessionStats,
    backlog_cap: usize,
}

impl SessionShared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Publish the machine's current state. Called with the core lock held so
    /// the watch value and the event order agree.
    fn publish_state(&self, core: &mut Core) {
        let state = core.machine.state();
        self.state_tx.send_replace(state);
        if !state.is_shutting_down() {
            core.emit(SessionEvent::State(state), self.backlog_cap);
        }
    }

    fn attempt(&self) -> u32 {
        self.lock_core().machine.attempt()
    }

    /// `connecting → open`; hands back the queued frames to flush.
    fn mark_connected(&self) -> Option<Vec<Frame>> {
        let mut core = self.lock_core();
        match core.machine.connected() {
            Ok(flush) => {
                self.publish_state(&mut core);
                info!(session_id = %self.id, kind = %self.kind, queued = flush.len(), "session open");
                Some(flush)
            }
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "connected after close, discarding link");
                None
            }
        }
    }

    /// `→ errored`; returns the attempt number to back off for.
    fn mark_failed(&self, err: &TransportError) -> Option<u32> {
        let mut core = self.lock_core();
        match core.machine.transport_failed() {
            Ok(()) => {
                self.publish_state(&mut core);
                let attempt = core.machine.attempt();
                warn!(session_id = %self.id, kind = %self.kind, attempt, error = %err, "session transport error");
                Some(attempt)
            }
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "transport error after close ignored");
                None
            }
        }
    }

    /// `errored → connecting` once the backoff elapsed.
    fn mark_retry(&self) -> bool {
        let mut core = self.lock_core();
        match core.machine.retry() {
            Ok(attempt) => {
                SessionStats::bump(&self.stats.reconnects);
                self.publish_state(&mut core);
                debug!(session_id = %self.id, attempt, "reconnecting");
                true
            }
            Err(_) => false,
        }
    }

    fn take_outbound(&self) -> Vec<Frame> {
        self.lock_core().machine.take_outbound()
    }

    fn requeue(&self, frames: Vec<Frame>) {
        let mut core = self.lock_core();
        for frame in core.machine.requeue_front(frames) {
            SessionStats::bump(&self.stats.outbound_dropped);
            core.emit(SessionEvent::OutboundDropped { frame }, self.backlog_cap);
        }
    }

    fn record_sent(&self) {
        SessionStats::bump(&self.stats.frames_sent);
    }

    /// Decode and deliver one inbound message. Decode failures are dropped
    /// here and never reach the state machine.
    fn receive(&self, wire: &WireMessage) {
        let frame = match codec::decode(wire) {
            Ok(frame) => frame,
            Err(err) => {
                SessionStats::bump(&self.stats.decode_errors);
                warn!(session_id = %self.id, error = %err, "dropping undecodable frame");
                return;
            }
        };

        let mut core = self.lock_core();
        let Some(seq) = core.machine.next_inbound_seq() else {
            debug!(session_id = %self.id, frame_type = frame.frame_type(), "frame arrived while not open, dropping");
            return;
        };
        SessionStats::bump(&self.stats.frames_received);
        if frame.is_unknown() || !self.kind.accepts(&frame) {
            SessionStats::bump(&self.stats.unhandled_frames);
            info!(
                session_id = %self.id,
                kind = %self.kind,
                frame_type = frame.frame_type(),
                seq,
                "unhandled frame type"
            );
        }
        core.emit(SessionEvent::Frame { seq, frame }, self.backlog_cap);
    }

    /// Move through `closing → closed`, stop the driver, and release buffers.
    /// No-op if already shutting down.
    fn shutdown(&self, reason: &str) {
        {
            let mut core = self.lock_core();
            let discarded = match core.machine.begin_close() {
                Ok(discarded) => discarded,
                Err(_) => return,
            };
            self.state_tx.send_replace(ConnectionState::Closing);
            self.cancel.cancel();
            if let Err(e) = core.machine.finish_close() {
                warn!(session_id = %self.id, error = %e, "close did not complete");
            }
            self.state_tx.send_replace(core.machine.state());
            core.subscribers.clear();
            core.backlog.clear();
            info!(session_id = %self.id, kind = %self.kind, discarded, reason, "session closed");
        }
        self.wake.notify_one();
    }
}

/// Handle to one live session. Cheap to clone; every clone refers to the
/// same connection.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    /// Create the session, move it to `connecting`, and spawn its driver.
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        target: ConnectTarget,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> Self {
        let handle = Self::new_idle(target.subject_id.clone(), target.kind, &config);
        {
            let mut core = handle.shared.lock_core();
            if core.machine.open().is_ok() {
                handle.shared.publish_state(&mut core);
            }
        }
        debug!(session_id = %handle.shared.id, kind = %handle.shared.kind, "spawning session driver");
        tokio::spawn(driver::run(handle.shared.clone(), connector, target, config));
        handle
    }

    pub(crate) fn new_idle(id: String, kind: SessionKind, config: &SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            shared: Arc::new(SessionShared {
                id,
                kind,
                core: Mutex::new(Core {
                    machine: SessionMachine::new(config.outbound_queue_cap),
                    subscribers: Vec::new(),
                    backlog: VecDeque::new(),
                    subscribed: false,
                }),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                state_tx,
                stats: SessionStats::default(),
                backlog_cap: config.event_backlog_cap.max(1),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn kind(&self) -> SessionKind {
        self.shared.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Connectivity status indicator for the view.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Current reconnect attempt (0 once connected).
    pub fn attempt(&self) -> u32 {
        self.shared.attempt()
    }

    /// Sequence number of the most recently delivered inbound frame.
    pub fn inbound_seq(&self) -> u64 {
        self.shared.lock_core().machine.inbound_seq()
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.shared.lock_core().machine.last_activity_at()
    }

    pub fn queued_outbound(&self) -> usize {
        self.shared.lock_core().machine.queued()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// True if both handles refer to the same session instance.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Queue a frame for sending. Fire-and-forget: frames issued while not
    /// open wait in the bounded queue and are flushed on open. Overflow is
    /// reported as [`SessionEvent::OutboundDropped`].
    pub fn send(&self, frame: Frame) {
        {
            let mut core = self.shared.lock_core();
            if core.machine.state().is_shutting_down() {
                debug!(session_id = %self.shared.id, frame_type = frame.frame_type(), "send on closed session ignored");
                return;
            }
            if let Some(dropped) = core.machine.enqueue(frame) {
                SessionStats::bump(&self.shared.stats.outbound_dropped);
                core.emit(
                    SessionEvent::OutboundDropped { frame: dropped },
                    self.shared.backlog_cap,
                );
            }
        }
        self.shared.wake.notify_one();
    }

    /// Subscribe to this session's events. The first subscriber also receives
    /// everything emitted before it subscribed.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut core = self.shared.lock_core();
            if !core.machine.state().is_shutting_down() {
                if !core.subscribed {
                    core.subscribed = true;
                    for event in core.backlog.drain(..) {
                        let _ = tx.send(event);
                    }
                }
                core.subscribers.push(tx);
            }
        }
        EventStream {
            rx,
            shared: self.shared.clone(),
        }
    }

    /// Close the session. Synchronous: on return the session is `closed`,
    /// pending reconnects are cancelled and queued frames are discarded.
    pub fn close(&self) {
        self.shared.shutdown("closed by caller");
    }
}

/// Ordered inbound events for one subscriber.
///
/// Yields nothing once the session is closing or closed, even if events were
/// still buffered.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    shared: Arc<SessionShared>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await?;
        self.gate(event)
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        let event = self.rx.try_recv().ok()?;
        self.gate(event)
    }

    fn gate(&self, event: SessionEvent) -> Option<SessionEvent> {
        if self.shared.state().is_shutting_down() {
            None
        } else {
            Some(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TerminalSize;

    fn idle(cap: usize) -> SessionHandle {
        let config = SessionConfig {
            outbound_queue_cap: cap,
            ..SessionConfig::default()
        };
        SessionHandle::new_idle("tab-1".into(), SessionKind::Shell, &config)
    }

    #[test]
    fn backlog_is_replayed_to_first_subscriber_only() {
        let session = idle(1);
        session.send(Frame::ShellInput("a".into()));
        session.send(Frame::ShellInput("b".into()));

        let mut first = session.subscribe();
        assert_eq!(
            first.try_recv(),
            Some(SessionEvent::OutboundDropped {
                frame: Frame::ShellInput("a".into())
            })
        );
        assert_eq!(first.try_recv(), None);

        let mut second = session.subscribe();
        assert_eq!(second.try_recv(), None);
    }

    #[test]
    fn overflow_is_reported_to_subscribers() {
        let session = idle(2);
        let mut events = session.subscribe();
        for i in 0..3 {
            session.send(Frame::ShellResize(TerminalSize { rows: i, cols: 80 }));
        }
        assert_eq!(
            events.try_recv(),
            Some(SessionEvent::OutboundDropped {
                frame: Frame::ShellResize(TerminalSize { rows: 0, cols: 80 })
            })
        );
        assert_eq!(session.stats().outbound_dropped, 1);
        assert_eq!(session.queued_outbound(), 2);
    }

    #[test]
    fn close_is_synchronous_and_idempotent() {
        let session = idle(4);
        session.send(Frame::ShellInput("pending".into()));
        let watch = session.watch_state();

        session.close();
        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(*watch.borrow(), ConnectionState::Closed);
        assert_eq!(session.queued_outbound(), 0);

        session.close();
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn closed_session_delivers_nothing() {
        let session = idle(1);
        let mut events = session.subscribe();
        session.send(Frame::ShellInput("x".into()));
        // Overflow puts an event in the subscriber's channel
        session.send(Frame::ShellInput("y".into()));
        session.close();
        assert_eq!(events.try_recv(), None);

        session.send(Frame::ShellInput("late".into()));
        assert_eq!(session.queued_outbound(), 0);

        let mut late = session.subscribe();
        assert_eq!(late.try_recv(), None);
    }

    #[test]
    fn clones_are_the_same_session() {
        let a = idle(4);
        let b = a.clone();
        let c = idle(4);
        assert!(a.same_session(&b));
        assert!(!a.same_session(&c));
    }
}
