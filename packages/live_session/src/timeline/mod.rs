//! Timeline
//!
//! The ordered item list a chat-style view renders, built from a one-shot
//! historical snapshot plus streamed deltas.

pub mod merger;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Role;

pub use merger::{ReconciliationMerger, TimelineDelta};
pub use snapshot::parse_snapshot;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Still being filled by streamed increments
    #[serde(default)]
    pub is_placeholder: bool,
    /// The id was generated here and may be replaced by the backend's
    #[serde(skip)]
    local_id: bool,
    #[serde(skip)]
    increments: u32,
}

impl TimelineItem {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            is_placeholder: false,
            local_id: false,
            increments: 0,
        }
    }

    /// An item with a freshly generated local id.
    pub fn local(role: Role, content: impl Into<String>) -> Self {
        Self {
            local_id: true,
            ..Self::new(new_local_id(), role, content)
        }
    }

    fn placeholder(id: Option<String>, role: Role) -> Self {
        let mut item = match id {
            Some(id) => Self::new(id, role, ""),
            None => Self::local(role, ""),
        };
        item.is_placeholder = true;
        item
    }

    pub fn has_local_id(&self) -> bool {
        self.local_id
    }
}

pub(crate) fn new_local_id() -> String {
    format!("local-{}", Uuid::new_v4())
}
