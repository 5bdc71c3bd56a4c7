//! Zone synchronization: change tracking, conflict resolution, status
//! projection, and the [`ZoneSyncManager`] that serializes them.

pub mod change_log;
pub mod conflict;
pub mod engine;
pub mod errors;
pub mod manager;
pub mod state_machine;

#[cfg(test)]
mod tests;

pub use change_log::{AckOutcome, ChangeId, ChangeLog, PendingChange};
pub use conflict::{
    ConflictPolicy, ConflictResolver, Reconciliation, Resolution, UnknownPolicy, ZoneConflict,
};
pub use engine::{EngineOutput, ProximityEvent, SyncEngine};
pub use errors::{SyncError, SyncResult};
pub use manager::{StateCallback, SubscriptionId, ZoneSyncManager};
pub use state_machine::{SyncState, SyncStateMachine, SyncStatus};
