//! Session State Machine
//!
//! Pure connection lifecycle, outbound queue and inbound sequencing. No I/O:
//! the driver feeds it transport signals and acts on what it returns.
//!
//! ```text
//! idle → connecting → open → closing → closed
//!           │   ▲       │
//!           ▼   │       │
//!         errored ◀─────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

use crate::protocol::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Errored)
                | (Open, Errored)
                | (Errored, Connecting)
                | (Idle, Closing)
                | (Connecting, Closing)
                | (Open, Closing)
                | (Errored, Closing)
                | (Closing, Closed)
        )
    }

    /// Closing or closed: nothing more is delivered.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

pub struct SessionMachine {
    state: ConnectionState,
    attempt: u32,
    close_requested: bool,
    outbound: VecDeque<Frame>,
    outbound_cap: usize,
    inbound_seq: u64,
    last_activity_at: DateTime<Utc>,
}

impl SessionMachine {
    pub fn new(outbound_cap: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            close_requested: false,
            outbound: VecDeque::new(),
            outbound_cap: outbound_cap.max(1),
            inbound_seq: 0,
            last_activity_at: Utc::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn inbound_seq(&self) -> u64 {
        self.inbound_seq
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// `idle → connecting`.
    pub fn open(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ConnectionState::Connecting)?;
        self.attempt = 0;
        Ok(())
    }

    /// `connecting → open`. Returns the queued frames to flush, oldest first.
    pub fn connected(&mut self) -> Result<Vec<Frame>, InvalidTransition> {
        self.transition(ConnectionState::Open)?;
        self.attempt = 0;
        Ok(self.outbound.drain(..).collect())
    }

    /// `connecting|open → errored`.
    pub fn transport_failed(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ConnectionState::Errored)
    }

    /// `errored → connecting` after the backoff elapsed. Refused once a close
    /// was requested.
    pub fn retry(&mut self) -> Result<u32, InvalidTransition> {
        if self.close_requested {
            return Err(InvalidTransition {
                from: self.state,
                to: ConnectionState::Connecting,
            });
        }
        self.transition(ConnectionState::Connecting)?;
        self.attempt = self.attempt.saturating_add(1);
        Ok(self.attempt)
    }

    /// `* → closing`. Queued frames are discarded, never sent after close.
    pub fn begin_close(&mut self) -> Result<usize, InvalidTransition> {
        self.transition(ConnectionState::Closing)?;
        self.close_requested = true;
        let discarded = self.outbound.len();
        self.outbound.clear();
        Ok(discarded)
    }

    /// `closing → closed`. Terminal.
    pub fn finish_close(&mut self) -> Result<(), InvalidTransition> {
        self.transition(ConnectionState::Closed)
    }

    /// Queue a frame for sending. Returns the oldest queued frame if the
    /// queue was full and it had to be dropped.
    pub fn enqueue(&mut self, frame: Frame) -> Option<Frame> {
        if self.state.is_shutting_down() {
            return None;
        }
        let dropped = if self.outbound.len() >= self.outbound_cap {
            self.outbound.pop_front()
        } else {
            None
        };
        if let Some(frame) = &dropped {
            warn!(
                frame_type = frame.frame_type(),
                cap = self.outbound_cap,
                state = %self.state,
                "outbound queue full, dropping oldest frame"
            );
        }
        self.outbound.push_back(frame);
        dropped
    }

    /// Take everything queued, but only while open.
    pub fn take_outbound(&mut self) -> Vec<Frame> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }
        self.outbound.drain(..).collect()
    }

    /// Put frames the transport refused back at the head of the queue,
    /// preserving order. Returns whatever the cap forced out, oldest first.
    pub fn requeue_front(&mut self, frames: Vec<Frame>) -> Vec<Frame> {
        if self.state.is_shutting_down() {
            return Vec::new();
        }
        for frame in frames.into_iter().rev() {
            self.outbound.push_front(frame);
        }
        let mut dropped = Vec::new();
        while self.outbound.len() > self.outbound_cap {
            if let Some(frame) = self.outbound.pop_front() {
                warn!(
                    frame_type = frame.frame_type(),
                    cap = self.outbound_cap,
                    "outbound queue over capacity after requeue, dropping oldest frame"
                );
                dropped.push(frame);
            }
        }
        dropped
    }

    /// Assign the next inbound sequence number. `None` unless open.
    pub fn next_inbound_seq(&mut self) -> Option<u64> {
        if self.state != ConnectionState::Open {
            return None;
        }
        self.inbound_seq += 1;
        self.last_activity_at = Utc::now();
        Some(self.inbound_seq)
    }
}
