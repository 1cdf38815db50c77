//! # Live Session
//!
//! Client-side multiplexer for live streaming sessions: interactive shells,
//! streaming agent chat, job log tails and device telemetry.
//!
//! ## Overview
//!
//! - [`SessionRegistry`] opens at most one connection per subject id and
//!   tears sessions down on release
//! - each [`SessionHandle`] supervises one connection: state machine,
//!   bounded outbound queue, inbound sequencing, reconnect with backoff
//! - [`codec`] turns wire messages into typed [`Frame`]s
//! - [`timeline::ReconciliationMerger`] folds a history snapshot and streamed
//!   deltas into one ordered timeline
//! - [`bridge`] adapts session events for terminal, chat and log views
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use live_session::bridge::{LogTailBridge, pump};
//! use live_session::{MuxConfig, SessionKind, SessionRegistry, WebSocketConnector};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MuxConfig::load(None)?;
//! let connector = Arc::new(WebSocketConnector::new(config.url_template.clone()));
//! let registry = SessionRegistry::new(connector, config.session.clone());
//!
//! let session = registry.acquire("job-42", SessionKind::JobLog);
//! let mut tail = LogTailBridge::new(session.clone(), config.bridges.log_tail_max_items);
//! let mut events = session.subscribe();
//! pump(&mut events, &mut tail).await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod timeline;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use backoff::BackoffPolicy;
pub use codec::WireMessage;
pub use config::{BridgeLimits, MuxConfig, SessionConfig};
pub use error::{ConfigError, DecodeError, MergeError, TransportError};
pub use protocol::{Frame, SessionKind};
pub use registry::SessionRegistry;
pub use session::{ConnectionState, EventStream, SessionEvent, SessionHandle, StatsSnapshot};
pub use timeline::{ReconciliationMerger, TimelineDelta, TimelineItem};
pub use transport::{ConnectTarget, Connector, WebSocketConnector};
