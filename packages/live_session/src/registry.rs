//! Session Registry
//!
//! Indexes live sessions by subject id and guarantees at most one live
//! connection per id. Constructed explicitly and handed to views; there is no
//! process-wide instance.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::protocol::SessionKind;
use crate::session::SessionHandle;
use crate::transport::{ConnectTarget, Connector};

pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    auth_token: Option<String>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            auth_token: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Credential passed to the transport when sessions connect. Never
    /// inspected here.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Lock the map, first forgetting sessions that ended on their own, such
    /// as those the peer closed.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|id, session| {
            let live = !session.state().is_shutting_down();
            if !live {
                debug!(session_id = %id, "pruning ended session");
            }
            live
        });
        sessions
    }

    /// Return the live session for `id`, or open a new one.
    ///
    /// A live session of a different kind is torn down before its
    /// replacement starts. Must be called from within a tokio runtime.
    pub fn acquire(&self, id: &str, kind: SessionKind) -> SessionHandle {
        let mut sessions = self.lock();

        if let Some(existing) = sessions.get(id) {
            if existing.state().is_shutting_down() {
                debug!(session_id = id, "replacing closed session");
            } else if existing.kind() == kind {
                return existing.clone();
            } else {
                info!(
                    session_id = id,
                    old_kind = %existing.kind(),
                    new_kind = %kind,
                    "subject kind changed, tearing down previous session"
                );
                existing.close();
            }
        }

        let target = ConnectTarget {
            kind,
            subject_id: id.to_string(),
            auth_token: self.auth_token.clone(),
        };
        let session = SessionHandle::spawn(target, self.connector.clone(), self.config.clone());
        sessions.insert(id.to_string(), session.clone());
        info!(session_id = id, %kind, live = sessions.len(), "session acquired");
        session
    }

    /// Close and forget the session for `id`. Safe in any state, including
    /// mid-backoff. Returns false if no session was registered.
    pub fn release(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Release every session.
    pub fn clear(&self) {
        let drained: Vec<SessionHandle> = self.lock().drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "releasing all sessions");
        }
        for session in drained {
            session.close();
        }
    }

    /// Sessions with no activity for longer than `threshold`. Diagnostics only.
    pub fn idle_sessions(&self, threshold: Duration) -> Vec<String> {
        let cutoff = Utc::now() - threshold;
        let mut idle: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, s)| s.last_activity_at() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();
        idle
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}
