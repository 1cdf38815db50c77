//! Log Tail Bridge
//!
//! Every log, agent log or telemetry frame becomes its own line. Lines never
//! merge; the oldest are evicted past the retention limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, warn};

use super::DisplayBridge;
use crate::protocol::{Frame, LogPayload};
use crate::session::{SessionEvent, SessionHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Agent,
    Log,
    Telemetry,
    Status,
    /// Loaded from history rather than streamed
    History,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Inbound sequence number; `None` for history
    pub seq: Option<u64>,
    pub source: LogSource,
    pub level: Option<String>,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogEntry {
    fn from_log(seq: u64, source: LogSource, log: LogPayload) -> Self {
        Self {
            seq: Some(seq),
            source,
            level: log.level,
            message: log.message,
            timestamp: log.timestamp,
        }
    }

    /// A line loaded from a previous run.
    pub fn history(message: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            seq: None,
            source: LogSource::History,
            level: None,
            message: message.into(),
            timestamp,
        }
    }

    /// Map a frame to a line, if it is one.
    pub fn from_frame(seq: u64, frame: Frame) -> Option<Self> {
        let entry = match frame {
            Frame::AgentLog(log) => Self::from_log(seq, LogSource::Agent, log),
            Frame::Log(log) => Self::from_log(seq, LogSource::Log, log),
            Frame::Telemetry(value) => Self {
                seq: Some(seq),
                source: LogSource::Telemetry,
                level: None,
                message: value.to_string(),
                timestamp: None,
            },
            Frame::AgentStatusUpdate(update) => {
                let status = update.status.as_str();
                let message = match update.message {
                    Some(detail) => format!("status {status}: {detail}"),
                    None => format!("status {status}"),
                };
                Self {
                    seq: Some(seq),
                    source: LogSource::Status,
                    level: None,
                    message,
                    timestamp: None,
                }
            }
            _ => return None,
        };
        Some(entry)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ts) = self.timestamp {
            write!(f, "{} ", ts.format("%H:%M:%S%.3f"))?;
        }
        if let Some(level) = &self.level {
            write!(f, "{:>5} ", level.to_uppercase())?;
        }
        f.write_str(&self.message)
    }
}

pub struct LogTailBridge {
    session: SessionHandle,
    entries: VecDeque<LogEntry>,
    max_items: usize,
    evicted: u64,
    seeded: bool,
}

impl LogTailBridge {
    pub fn new(session: SessionHandle, max_items: usize) -> Self {
        Self {
            session,
            entries: VecDeque::new(),
            max_items: max_items.max(1),
            evicted: 0,
            seeded: false,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lines dropped to stay within the retention limit.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Insert earlier lines ahead of anything already streamed. Only the
    /// first call has an effect.
    pub fn seed(&mut self, history: Vec<LogEntry>) {
        if self.seeded {
            warn!(session_id = self.session.id(), "log history already loaded, ignoring");
            return;
        }
        self.seeded = true;
        for entry in history.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.enforce_limit();
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        self.enforce_limit();
    }

    fn enforce_limit(&mut self) {
        while self.entries.len() > self.max_items {
            self.entries.pop_front();
            self.evicted += 1;
        }
    }
}

impl DisplayBridge for LogTailBridge {
    fn handle_event(&mut self, event: SessionEvent) {
        let SessionEvent::Frame { seq, frame } = event else {
            return;
        };
        let frame_type = frame.frame_type().to_string();
        match LogEntry::from_frame(seq, frame) {
            Some(entry) => self.push(entry),
            None => debug!(session_id = self.session.id(), frame_type = %frame_type, seq, "not a log line"),
        }
    }
}
