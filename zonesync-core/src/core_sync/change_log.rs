/*
    change_log.rs - Locally-originated deltas awaiting the authority

    Ordered, append-only queue of PendingChange entries. Entries leave the log
    when the authority acknowledges them, when an authority delta settles their
    cells, or when a later local edit supersedes every cell they touch.

    Invariant: at most one outstanding intent per cell. Before a new entry is
    appended, `supersede` strips the new entry's cells from older entries and
    drops entries that end up empty.
*/

use crate::core_zone::{CellId, ZoneDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use uuid::Uuid;

/// Submission sequence number of a pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u64);

/// A local delta held until the authority settles it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: ChangeId,
    /// Envelope message id used when the change is transmitted
    pub message_id: String,
    pub delta: ZoneDelta,
}

/// Result of matching an acknowledgment against the log
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// The earliest entry covered by the ack was removed
    Matched(PendingChange),
    /// No entry is covered; the ack is handed to conflict resolution
    Unmatched(ZoneDelta),
}

#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: VecDeque<PendingChange>,
    next_id: u64,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to the tail, preserving submission order
    pub fn append(&mut self, delta: ZoneDelta) -> PendingChange {
        self.next_id += 1;
        let entry = PendingChange {
            id: ChangeId(self.next_id),
            message_id: Uuid::new_v4().to_string(),
            delta,
        };
        self.entries.push_back(entry.clone());
        entry
    }

    /// Strip the cells of `new_delta` from every older entry
    ///
    /// Returns the entries that became empty and were removed.
    pub fn supersede(&mut self, new_delta: &ZoneDelta) -> Vec<PendingChange> {
        let cells = new_delta.touched();
        if cells.is_empty() {
            return Vec::new();
        }

        let mut dropped = Vec::new();
        self.entries.retain_mut(|entry| {
            if !cells.iter().any(|cell| entry.delta.touches(cell)) {
                return true;
            }
            let trimmed = entry.delta.without_cells(&cells);
            if trimmed.is_empty() {
                dropped.push(entry.clone());
                false
            } else {
                entry.delta = trimmed;
                true
            }
        });
        dropped
    }

    /// Remove the earliest entry whose cell-level effect is contained in `acked`
    pub fn reconcile_ack(&mut self, acked: &ZoneDelta) -> AckOutcome {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.delta.effects_subset_of(acked));

        match position.and_then(|idx| self.entries.remove(idx)) {
            Some(entry) => AckOutcome::Matched(entry),
            None => AckOutcome::Unmatched(acked.clone()),
        }
    }

    /// Drop `cells` from entry `id`; returns the entry if it became empty and was removed
    pub fn settle(&mut self, id: ChangeId, cells: &BTreeSet<CellId>) -> Option<PendingChange> {
        let idx = self.entries.iter().position(|entry| entry.id == id)?;
        let trimmed = self.entries[idx].delta.without_cells(cells);
        if trimmed.is_empty() {
            self.entries.remove(idx)
        } else {
            self.entries[idx].delta = trimmed;
            None
        }
    }

    /// Whether any pending entry mentions `cell`
    pub fn covers(&self, cell: &CellId) -> bool {
        self.entries.iter().any(|entry| entry.delta.touches(cell))
    }

    pub fn get(&self, id: ChangeId) -> Option<&PendingChange> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter()
    }

    pub fn deltas(&self) -> impl Iterator<Item = &ZoneDelta> {
        self.entries.iter().map(|entry| &entry.delta)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read-only copy in submission order
    pub fn to_ordered_sequence(&self) -> Vec<PendingChange> {
        self.entries.iter().cloned().collect()
    }
}
