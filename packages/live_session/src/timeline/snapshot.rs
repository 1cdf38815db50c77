//! Historical snapshot parsing.
//!
//! The one-shot history endpoint answers with either a bare JSON array of
//! items or an object wrapping them under `items`.

use serde::Deserialize;

use super::TimelineItem;
use crate::error::DecodeError;
use crate::protocol::Role;

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotBody {
    Bare(Vec<SnapshotItem>),
    Wrapped { items: Vec<SnapshotItem> },
}

#[derive(Deserialize)]
struct SnapshotItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    role: Role,
    #[serde(default, alias = "text")]
    content: String,
}

/// Parse a snapshot response body into timeline items, in the order given.
/// Items without an id get a local one.
pub fn parse_snapshot(body: &[u8]) -> Result<Vec<TimelineItem>, DecodeError> {
    let body: SnapshotBody =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let items = match body {
        SnapshotBody::Bare(items) | SnapshotBody::Wrapped { items } => items,
    };
    Ok(items
        .into_iter()
        .map(|item| match item.id {
            Some(id) => TimelineItem::new(id, item.role, item.content),
            None => TimelineItem::local(item.role, item.content),
        })
        .collect())
}
