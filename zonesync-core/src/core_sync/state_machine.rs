/*
    state_machine.rs - Observable sync status

    The status is a pure projection of (pending changes, retained conflicts,
    transport connectivity). It is recomputed after every mutation and is never
    set directly.

        disconnected  transport not connected (dominates everything else)
        conflict      at least one retained conflict
        syncing       pending local changes
        synced        none of the above
*/

use super::change_log::PendingChange;
use super::conflict::ZoneConflict;
use crate::core_zone::{Timestamp, ZoneSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Conflict,
    Disconnected,
}

impl SyncStatus {
    /// Derive the status from its three inputs
    pub fn derive(pending_changes: usize, conflict_count: usize, connected: bool) -> Self {
        if !connected {
            SyncStatus::Disconnected
        } else if conflict_count > 0 {
            SyncStatus::Conflict
        } else if pending_changes > 0 {
            SyncStatus::Syncing
        } else {
            SyncStatus::Synced
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the last derived status so transitions can be reported
#[derive(Debug)]
pub struct SyncStateMachine {
    status: SyncStatus,
}

impl SyncStateMachine {
    pub fn new() -> Self {
        SyncStateMachine { status: SyncStatus::Disconnected }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Recompute; returns `(from, to)` when the status changed
    pub fn recompute(
        &mut self,
        pending_changes: usize,
        conflict_count: usize,
        connected: bool,
    ) -> Option<(SyncStatus, SyncStatus)> {
        let next = SyncStatus::derive(pending_changes, conflict_count, connected);
        if next == self.status {
            return None;
        }
        let previous = std::mem::replace(&mut self.status, next);
        Some((previous, next))
    }
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Published view of one zone's synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub zone_id: String,
    pub current_zone: ZoneSnapshot,
    pub pending_changes: Vec<PendingChange>,
    pub last_sync_time: Option<Timestamp>,
    pub last_server_update: Option<Timestamp>,
    pub conflict_count: usize,
    pub conflicts: Vec<ZoneConflict>,
    pub sync_status: SyncStatus,
    /// Incremented on every published change
    pub version: u64,
}
