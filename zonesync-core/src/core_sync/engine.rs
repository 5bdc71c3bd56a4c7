/*
    engine.rs - Serialized reconciliation core for one zone

    Owns the authority-confirmed snapshot, the ChangeLog of local intents and
    the ConflictResolver. The zone presented to callers is always

        current = fold(confirmed, pending deltas in submission order)

    so optimistic local edits are visible immediately and a lost dispute is
    rolled back by dropping the cell from the pending entry (never silently:
    a ZoneConflict is recorded first).

    The engine is synchronous and does no I/O. It reports what must go on the
    wire through EngineOutput; ZoneSyncManager feeds it from a single task.
*/

use super::change_log::{AckOutcome, ChangeLog, PendingChange};
use super::conflict::{ConflictPolicy, ConflictResolver};
use super::state_machine::{SyncState, SyncStateMachine, SyncStatus};
use crate::core_zone::{
    apply, diff, fold, CellId, DeltaError, DeltaSource, Timestamp, ZoneDelta, ZoneSnapshot,
};
use crate::metrics;
use tracing::{debug, info, warn};

/// Wire work produced by one engine step
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineOutput {
    /// Entries to transmit (new, or re-sent after winning a dispute)
    pub transmit: Vec<PendingChange>,
    /// Message ids that no longer need transmission or acknowledgment
    pub release: Vec<String>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.transmit.is_empty() && self.release.is_empty()
    }
}

/// Proximity trigger from the geolocation collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximityEvent {
    Entered(CellId),
    Exited(CellId),
}

impl ProximityEvent {
    /// Local delta expressing the event
    pub fn to_delta(&self, timestamp: Timestamp) -> ZoneDelta {
        let delta = ZoneDelta::new(DeltaSource::Manager, timestamp);
        match self {
            ProximityEvent::Entered(cell) => delta.add(cell.clone()),
            ProximityEvent::Exited(cell) => delta.remove(cell.clone()),
        }
    }
}

#[derive(Debug)]
pub struct SyncEngine {
    zone_id: String,
    confirmed: ZoneSnapshot,
    current: ZoneSnapshot,
    log: ChangeLog,
    resolver: ConflictResolver,
    machine: SyncStateMachine,
    connected: bool,
    last_sync_time: Option<Timestamp>,
    last_server_update: Option<Timestamp>,
    version: u64,
}

impl SyncEngine {
    pub fn new(
        zone_id: impl Into<String>,
        initial: ZoneSnapshot,
        policy: ConflictPolicy,
        max_retained_conflicts: usize,
    ) -> Self {
        SyncEngine {
            zone_id: zone_id.into(),
            current: initial.clone(),
            confirmed: initial,
            log: ChangeLog::new(),
            resolver: ConflictResolver::new(policy, max_retained_conflicts),
            machine: SyncStateMachine::new(),
            connected: false,
            last_sync_time: None,
            last_server_update: None,
            version: 0,
        }
    }

    /// Apply a local edit optimistically and queue it for the authority
    pub fn submit_local_change(&mut self, delta: ZoneDelta) -> Result<EngineOutput, DeltaError> {
        let delta = delta.from_source(DeltaSource::Manager);
        delta.validate()?;

        let mut output = EngineOutput::default();
        if delta.is_empty() {
            return Ok(output);
        }
        metrics::record_counter(metrics::DELTAS_SUBMITTED, 1);

        let screened = self.resolver.screen_stale(&delta);
        if let Some(conflict) = screened.conflict {
            info!(
                zone = %self.zone_id,
                cells = ?conflict.cells,
                resolution = %conflict.resolution,
                "Local edit predates authority change"
            );
            self.resolver.record(conflict);
            metrics::record_counter(metrics::CONFLICTS, 1);
        }
        let delta = delta.without_cells(&screened.settled);

        if !delta.is_empty() {
            let superseded = self.log.supersede(&delta);
            for entry in &superseded {
                debug!(zone = %self.zone_id, change = entry.id.0, "Pending change superseded");
            }
            output.release.extend(superseded.into_iter().map(|entry| entry.message_id));

            let entry = self.log.append(delta);
            debug!(
                zone = %self.zone_id,
                change = entry.id.0,
                cells = entry.delta.touched().len(),
                "Local change recorded"
            );
            output.transmit.push(entry);
        }

        self.refresh();
        Ok(output)
    }

    /// Diff the current zone against `after` and submit the difference
    pub fn submit_zone(&mut self, after: &ZoneSnapshot) -> Result<EngineOutput, DeltaError> {
        let delta = diff(&self.current, after).at(Timestamp::now());
        self.submit_local_change(delta)
    }

    /// Translate a proximity event into a local edit
    pub fn on_proximity_event(
        &mut self,
        event: &ProximityEvent,
    ) -> Result<EngineOutput, DeltaError> {
        self.submit_local_change(event.to_delta(Timestamp::now()))
    }

    /// Fold an authority delta in, reconciling every pending entry it touches
    pub fn on_server_delta(&mut self, delta: ZoneDelta) -> Result<EngineOutput, DeltaError> {
        delta.validate()?;
        metrics::record_counter(metrics::SERVER_DELTAS, 1);
        let timer = metrics::Timer::new(metrics::RECONCILE_DURATION_MS);

        self.confirmed = apply(&self.confirmed, &delta);
        self.resolver.record_authority(&delta);

        let mut output = EngineOutput::default();
        let mut settled_any = false;

        for entry in self.log.to_ordered_sequence() {
            let outcome = self.resolver.reconcile(&entry.delta, &delta);
            if let Some(conflict) = outcome.conflict {
                warn!(
                    zone = %self.zone_id,
                    change = entry.id.0,
                    cells = ?conflict.cells,
                    resolution = %conflict.resolution,
                    "Conflicting authority delta"
                );
                self.resolver.record(conflict);
                metrics::record_counter(metrics::CONFLICTS, 1);
            }
            if outcome.settled.is_empty() && outcome.retained.is_empty() {
                continue;
            }
            settled_any |= !outcome.settled.is_empty();

            match self.log.settle(entry.id, &outcome.settled) {
                Some(done) => output.release.push(done.message_id),
                None if !outcome.retained.is_empty() => {
                    if let Some(remaining) = self.log.get(entry.id) {
                        output.transmit.push(remaining.clone());
                    }
                }
                None => {}
            }
        }

        let now = Timestamp::now();
        self.last_server_update = Some(now);
        if settled_any {
            self.last_sync_time = Some(now);
        }
        self.refresh();
        timer.stop();
        Ok(output)
    }

    /// Handle an explicit acknowledgment carrying the acknowledged delta
    pub fn on_ack(&mut self, acked: ZoneDelta) -> Result<EngineOutput, DeltaError> {
        acked.validate()?;
        let mut output = EngineOutput::default();

        match self.log.reconcile_ack(&acked) {
            AckOutcome::Matched(entry) => {
                debug!(zone = %self.zone_id, change = entry.id.0, "Pending change acknowledged");
                self.confirmed = apply(&self.confirmed, &acked);
                self.resolver.record_authority(&acked);
                self.last_sync_time = Some(Timestamp::now());
                output.release.push(entry.message_id);
            }
            AckOutcome::Unmatched(acked) => {
                let residual = self.resolver.late_ack_residual(&acked, &self.log);
                debug!(
                    zone = %self.zone_id,
                    ignored = acked.touched().len() - residual.touched().len(),
                    "Acknowledgment matches no pending change"
                );
                if !residual.is_empty() {
                    self.confirmed = apply(&self.confirmed, &residual);
                    self.resolver.record_authority(&residual);
                }
            }
        }

        self.refresh();
        Ok(output)
    }

    /// Record transport connectivity; returns whether it changed
    pub fn set_connected(&mut self, connected: bool) -> bool {
        if self.connected == connected {
            return false;
        }
        self.connected = connected;
        self.refresh();
        true
    }

    pub fn clear_conflicts(&mut self) {
        self.resolver.clear_conflicts();
        self.refresh();
    }

    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    pub fn current_zone(&self) -> &ZoneSnapshot {
        &self.current
    }

    /// Last snapshot confirmed by the authority
    pub fn confirmed_zone(&self) -> &ZoneSnapshot {
        &self.confirmed
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn status(&self) -> SyncStatus {
        self.machine.status()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consistent copy of the published state
    pub fn state(&self) -> SyncState {
        SyncState {
            zone_id: self.zone_id.clone(),
            current_zone: self.current.clone(),
            pending_changes: self.log.to_ordered_sequence(),
            last_sync_time: self.last_sync_time,
            last_server_update: self.last_server_update,
            conflict_count: self.resolver.conflict_count(),
            conflicts: self.resolver.conflicts(),
            sync_status: self.machine.status(),
            version: self.version,
        }
    }

    fn refresh(&mut self) {
        self.current = fold(&self.confirmed, self.log.deltas());
        self.version += 1;

        let transition = self.machine.recompute(
            self.log.pending_count(),
            self.resolver.conflict_count(),
            self.connected,
        );
        if let Some((from, to)) = transition {
            info!(zone = %self.zone_id, %from, %to, "Sync status changed");
        }
        metrics::record_gauge(metrics::PENDING_CHANGES, self.log.pending_count() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_sync::conflict::Resolution;

    fn engine(cells: &[&str]) -> SyncEngine {
        let initial = ZoneSnapshot::default().with_cells(cells.iter().copied());
        let mut engine = SyncEngine::new("zone-1", initial, ConflictPolicy::Server, 16);
        engine.set_connected(true);
        engine
    }

    #[test]
    fn test_initial_state() {
        let engine = SyncEngine::new("z", ZoneSnapshot::default(), ConflictPolicy::Server, 4);
        let state = engine.state();
        assert_eq!(state.zone_id, "z");
        assert_eq!(state.sync_status, SyncStatus::Disconnected);
        assert!(state.pending_changes.is_empty());
        assert_eq!(state.last_server_update, None);
    }

    #[test]
    fn test_invalid_delta_rejected_without_mutation() {
        let mut engine = engine(&[]);
        let version = engine.version();
        let result = engine.submit_local_change(ZoneDelta::local().add("a").remove("a"));
        assert!(matches!(result, Err(DeltaError::OverlappingAddRemove { .. })));
        assert_eq!(engine.version(), version);
    }

    #[test]
    fn test_empty_delta_is_noop() {
        let mut engine = engine(&[]);
        let output = engine.submit_local_change(ZoneDelta::local()).unwrap();
        assert!(output.is_empty());
        assert!(engine.change_log().is_empty());
    }

    #[test]
    fn test_submit_forces_manager_source() {
        let mut engine = engine(&[]);
        let output = engine.submit_local_change(ZoneDelta::server().add("a")).unwrap();
        assert_eq!(output.transmit[0].delta.source, DeltaSource::Manager);
    }

    #[test]
    fn test_submit_zone_diffs_against_current() {
        let mut engine = engine(&["a", "b"]);
        let target = ZoneSnapshot::default().with_cells(["b", "c"]);

        let output = engine.submit_zone(&target).unwrap();
        assert_eq!(engine.current_zone(), &target);
        let delta = &output.transmit[0].delta;
        assert!(delta.added.contains(&"c".into()));
        assert!(delta.removed.contains(&"a".into()));
    }

    #[test]
    fn test_proximity_events() {
        let mut engine = engine(&[]);
        engine.on_proximity_event(&ProximityEvent::Entered("h7".into())).unwrap();
        assert!(engine.current_zone().contains(&"h7".into()));

        engine.on_proximity_event(&ProximityEvent::Exited("h7".into())).unwrap();
        assert!(!engine.current_zone().contains(&"h7".into()));
        assert_eq!(engine.change_log().pending_count(), 1);
    }

    #[test]
    fn test_superseded_entry_is_released() {
        let mut engine = engine(&[]);
        let first = engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();
        let second = engine.submit_local_change(ZoneDelta::local().remove("a")).unwrap();

        assert_eq!(second.release, vec![first.transmit[0].message_id.clone()]);
        assert_eq!(engine.change_log().pending_count(), 1);
        assert!(engine.current_zone().is_empty());
    }

    #[test]
    fn test_server_delta_on_untouched_cells_keeps_local_pending() {
        let mut engine = engine(&[]);
        engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();
        let output = engine.on_server_delta(ZoneDelta::server().add("b")).unwrap();

        assert!(output.is_empty());
        assert_eq!(engine.status(), SyncStatus::Syncing);
        assert_eq!(engine.current_zone(), &ZoneSnapshot::default().with_cells(["a", "b"]));
        assert!(engine.state().last_server_update.is_some());
    }

    #[test]
    fn test_ack_settles_entry() {
        let mut engine = engine(&[]);
        let sent = engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();

        let output = engine.on_ack(ZoneDelta::server().add("a")).unwrap();
        assert_eq!(output.release, vec![sent.transmit[0].message_id.clone()]);
        assert_eq!(engine.status(), SyncStatus::Synced);
        assert!(engine.confirmed_zone().contains(&"a".into()));
        assert!(engine.state().last_sync_time.is_some());
    }

    #[test]
    fn test_late_ack_for_superseded_change_is_ignored() {
        let mut engine = engine(&[]);
        engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();
        engine.submit_local_change(ZoneDelta::local().remove("a")).unwrap();

        // Authority echoes the first (superseded) edit after it was already sent.
        engine.on_ack(ZoneDelta::server().add("a")).unwrap();
        assert!(!engine.confirmed_zone().contains(&"a".into()));
        assert!(engine.current_zone().is_empty());
        assert_eq!(engine.state().conflict_count, 0);
        assert_eq!(engine.change_log().pending_count(), 1);
    }

    #[test]
    fn test_local_policy_resends_winning_cells() {
        let initial = ZoneSnapshot::default();
        let mut engine = SyncEngine::new("z", initial, ConflictPolicy::Local, 4);
        engine.set_connected(true);
        engine.submit_local_change(ZoneDelta::local().add("x").add("y")).unwrap();

        let output = engine.on_server_delta(ZoneDelta::server().remove("x").add("y")).unwrap();
        assert_eq!(output.transmit.len(), 1);
        assert_eq!(output.transmit[0].delta.added, ["x".into()].into_iter().collect());
        assert!(engine.current_zone().contains(&"x".into()));
        assert_eq!(engine.state().conflicts[0].resolution, Resolution::Local);
    }

    #[test]
    fn test_clear_conflicts_returns_to_synced() {
        let mut engine = engine(&["h1"]);
        engine.submit_local_change(ZoneDelta::local().remove("h1")).unwrap();
        engine.on_server_delta(ZoneDelta::server().modify("h1")).unwrap();
        assert_eq!(engine.status(), SyncStatus::Conflict);

        engine.clear_conflicts();
        assert_eq!(engine.status(), SyncStatus::Synced);
    }

    #[test]
    fn test_disconnect_dominates() {
        let mut engine = engine(&[]);
        engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();
        assert!(engine.set_connected(false));
        assert!(!engine.set_connected(false));
        assert_eq!(engine.status(), SyncStatus::Disconnected);
    }

    #[test]
    fn test_version_increments_per_mutation() {
        let mut engine = engine(&[]);
        let v0 = engine.version();
        engine.submit_local_change(ZoneDelta::local().add("a")).unwrap();
        engine.on_server_delta(ZoneDelta::server().add("b")).unwrap();
        assert_eq!(engine.version(), v0 + 2);
        assert_eq!(engine.state().version, v0 + 2);
    }
}
