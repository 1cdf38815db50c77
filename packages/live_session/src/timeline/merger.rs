//! Reconciliation Merger
//!
//! Folds a historical snapshot and a stream of deltas into one ordered,
//! deduplicated timeline.
//!
//! At most one turn is in flight at a time. Increments and terminal statuses
//! without an id apply to that turn; with an id they must match it, except
//! that a locally generated placeholder id is replaced by the first backend id
//! seen. Deltas applied before [`seed`](ReconciliationMerger::seed) are held
//! and replayed right after it, in arrival order. Local edits are the
//! exception: they show immediately and the snapshot is inserted ahead of them.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::TimelineItem;
use crate::error::MergeError;
use crate::protocol::Role;

/// One change to the timeline.
#[derive(Clone, Debug, PartialEq)]
pub enum TimelineDelta {
    /// A complete turn. Skipped if its id is already present.
    Turn {
        id: Option<String>,
        role: Role,
        content: String,
    },
    /// Open an empty in-flight item before its first increment arrives.
    Placeholder { id: Option<String>, role: Role },
    /// Streamed content for the in-flight turn.
    Increment {
        id: Option<String>,
        role: Role,
        text: String,
    },
    /// The in-flight turn is complete.
    Finalize { id: Option<String> },
}

#[derive(Default)]
pub struct ReconciliationMerger {
    items: Vec<TimelineItem>,
    index: HashMap<String, usize>,
    seeded: bool,
    pending: Vec<TimelineDelta>,
    in_flight: Option<usize>,
    /// The most recently finalized streamed item
    last_finalized: Option<usize>,
}

impl ReconciliationMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TimelineItem] {
        &self.items
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Deltas waiting for the snapshot.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> Option<&TimelineItem> {
        self.in_flight.map(|idx| &self.items[idx])
    }

    /// Insert the historical snapshot, then replay any buffered deltas.
    /// Only the first call has an effect.
    pub fn seed(&mut self, history: Vec<TimelineItem>) -> Result<(), MergeError> {
        if self.seeded {
            warn!(items = history.len(), "timeline already seeded, ignoring snapshot");
            return Err(MergeError::AlreadySeeded);
        }
        self.seeded = true;

        let local = std::mem::take(&mut self.items);
        let in_flight = self.in_flight.take();
        let last_finalized = self.last_finalized.take();
        self.index.clear();

        let total = history.len();
        for mut item in history {
            if self.index.contains_key(&item.id) || local.iter().any(|l| l.id == item.id) {
                debug!(item_id = %item.id, "duplicate snapshot item skipped");
                continue;
            }
            item.is_placeholder = false;
            item.local_id = false;
            self.push(item);
        }

        let offset = self.items.len();
        for item in local {
            self.push(item);
        }
        self.in_flight = in_flight.map(|idx| idx + offset);
        self.last_finalized = last_finalized.map(|idx| idx + offset);

        let pending = std::mem::take(&mut self.pending);
        debug!(snapshot = total, replayed = pending.len(), "timeline seeded");
        for delta in pending {
            self.apply(delta);
        }
        Ok(())
    }

    /// Apply one delta. Merge errors are logged and the delta is dropped;
    /// the timeline is left untouched.
    pub fn apply(&mut self, delta: TimelineDelta) -> &[TimelineItem] {
        if let Err(err) = self.try_apply(delta) {
            warn!(error = %err, "dropping timeline delta");
        }
        &self.items
    }

    /// Like [`apply`](Self::apply) but reports why a delta was rejected.
    /// Before seeding, deltas are buffered and always accepted.
    pub fn try_apply(&mut self, delta: TimelineDelta) -> Result<(), MergeError> {
        if !self.seeded {
            self.pending.push(delta);
            return Ok(());
        }
        self.apply_now(delta)
    }

    /// Apply a delta originating from this client. Unlike streamed deltas it
    /// is never buffered, so it is visible before the snapshot arrives.
    pub fn apply_local(&mut self, delta: TimelineDelta) -> &[TimelineItem] {
        if let Err(err) = self.apply_now(delta) {
            warn!(error = %err, "dropping local timeline delta");
        }
        &self.items
    }

    fn apply_now(&mut self, delta: TimelineDelta) -> Result<(), MergeError> {
        match delta {
            TimelineDelta::Turn { id, role, content } => {
                if let Some(id) = id.as_deref().filter(|id| self.index.contains_key(*id)) {
                    debug!(item_id = id, "duplicate turn skipped");
                    return Ok(());
                }
                if self.in_flight.is_some_and(|idx| self.items[idx].role == role) {
                    if let Some(idx) = self.match_in_flight(id.as_deref()) {
                        let item = &mut self.items[idx];
                        debug!(item_id = %item.id, "complete turn fills in-flight item");
                        item.content = content;
                        item.increments += 1;
                        item.is_placeholder = false;
                        self.in_flight = None;
                        self.last_finalized = Some(idx);
                        return Ok(());
                    }
                }
                let item = match id {
                    Some(id) => TimelineItem::new(id, role, content),
                    None => TimelineItem::local(role, content),
                };
                self.push(item);
                Ok(())
            }
            TimelineDelta::Placeholder { id, role } => {
                self.open_placeholder(id, role);
                Ok(())
            }
            TimelineDelta::Increment { id, role, text } => self.increment(id, role, text),
            TimelineDelta::Finalize { id } => self.finalize(id),
        }
    }

    fn push(&mut self, item: TimelineItem) -> usize {
        let idx = self.items.len();
        self.index.insert(item.id.clone(), idx);
        self.items.push(item);
        idx
    }

    fn open_placeholder(&mut self, id: Option<String>, role: Role) -> usize {
        if let Some(prev) = self.in_flight.take() {
            let item = &mut self.items[prev];
            item.is_placeholder = false;
            debug!(item_id = %item.id, "new turn started, sealing in-flight item");
            self.last_finalized = Some(prev);
        }
        let idx = self.push(TimelineItem::placeholder(id, role));
        self.in_flight = Some(idx);
        idx
    }

    /// The in-flight item if `id` refers to it, adopting `id` when the item
    /// only carries a local one.
    fn match_in_flight(&mut self, id: Option<&str>) -> Option<usize> {
        let idx = self.in_flight?;
        let Some(id) = id else {
            return Some(idx);
        };
        if self.items[idx].id == id {
            return Some(idx);
        }
        if self.items[idx].local_id && !self.index.contains_key(id) {
            let item = &mut self.items[idx];
            debug!(local_id = %item.id, item_id = id, "adopting backend id");
            self.index.remove(&item.id);
            item.id = id.to_string();
            item.local_id = false;
            self.index.insert(item.id.clone(), idx);
            return Some(idx);
        }
        None
    }

    fn finalized_item(&self, id: Option<&str>) -> Option<&TimelineItem> {
        match id {
            Some(id) => self
                .index
                .get(id)
                .map(|&idx| &self.items[idx])
                .filter(|item| !item.is_placeholder),
            // Nothing has been appended since the last finalize
            None => self
                .last_finalized
                .filter(|&idx| idx + 1 == self.items.len())
                .map(|idx| &self.items[idx]),
        }
    }

    fn increment(&mut self, id: Option<String>, role: Role, text: String) -> Result<(), MergeError> {
        let idx = match self.match_in_flight(id.as_deref()) {
            Some(idx) => idx,
            None => {
                if let Some(done) = self.finalized_item(id.as_deref()) {
                    return Err(MergeError::FinalizedTurn {
                        id: done.id.clone(),
                    });
                }
                self.open_placeholder(id, role)
            }
        };

        let item = &mut self.items[idx];
        if item.increments == 0 {
            item.content = text;
        } else {
            item.content.push_str(&text);
        }
        item.increments += 1;
        Ok(())
    }

    fn finalize(&mut self, id: Option<String>) -> Result<(), MergeError> {
        if let Some(idx) = self.match_in_flight(id.as_deref()) {
            self.items[idx].is_placeholder = false;
            self.in_flight = None;
            self.last_finalized = Some(idx);
            return Ok(());
        }
        match self.finalized_item(id.as_deref()) {
            Some(done) => Err(MergeError::FinalizedTurn {
                id: done.id.clone(),
            }),
            None => Err(MergeError::UnknownTurn { id }),
        }
    }
}
