/*
    conflict.rs - Reconciling local intents with authority deltas

    An authority delta only bears on a local intent it does not predate: when
    the authority change is older than the local delta, the local delta is the
    later edit and stays pending untouched. Otherwise each overlapping cell is
    one of:

    - settled:  both sides have the same effect (the authority confirmed it)
    - disputed: the sides leave the cell in different presence states
    - open:     same presence, different effect (add vs re-tag); it stays
                pending until acknowledged

    Policies for disputed cells:
    - server (default): the authority wins every disputed cell. Every client
      reaches the same result regardless of local history.
    - local: the local intent wins; the cell stays pending and is re-sent.
    - merge: per cell, the later timestamp wins; on a tie the server wins.
      A later local intent is never touched by an older authority change, so
      it differs from server only in how the conflict is labelled.

    The resolver also remembers the last authority effect per cell, so a local
    delta created at or before an authority change it has not yet observed is
    screened as if the authority delta had arrived after it. Both arrival
    orders go through the same rule above, so they end in the same zone and
    record the same conflicts.
*/

use super::change_log::{ChangeLog, PendingChange};
use crate::core_zone::{CellEffect, CellId, DeltaSource, Timestamp, ZoneDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which side wins a disputed cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Local,
    #[default]
    Server,
    Merge,
}

impl ConflictPolicy {
    fn resolution(self) -> Resolution {
        match self {
            ConflictPolicy::Local => Resolution::Local,
            ConflictPolicy::Server => Resolution::Server,
            ConflictPolicy::Merge => Resolution::Merge,
        }
    }

    /// Winner of one disputed cell.
    ///
    /// Disputes only arise when the authority change is not older than the
    /// local intent, so the merge rule (later wins, tie to the server) always
    /// lands on the server here.
    fn winner(self) -> DeltaSource {
        match self {
            ConflictPolicy::Local => DeltaSource::Manager,
            ConflictPolicy::Server | ConflictPolicy::Merge => DeltaSource::Server,
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ConflictPolicy::Local),
            "server" => Ok(ConflictPolicy::Server),
            "merge" => Ok(ConflictPolicy::Merge),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Conflict policy name that is not `local`, `server` or `merge`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown conflict policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolution())
    }
}

/// How a recorded conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Server,
    Merge,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Local => f.write_str("local"),
            Resolution::Server => f.write_str("server"),
            Resolution::Merge => f.write_str("merge"),
        }
    }
}

/// A collision between a local intent and an authority delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConflict {
    pub local_change: ZoneDelta,
    pub server_change: ZoneDelta,
    pub resolution: Resolution,
    pub timestamp: Timestamp,
    /// Cells left in different states by the two sides
    pub cells: BTreeSet<CellId>,
}

/// Per-entry outcome of reconciling against an authority delta
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub conflict: Option<ZoneConflict>,
    /// Cells to drop from the pending entry (confirmed, or lost to the authority)
    pub settled: BTreeSet<CellId>,
    /// Disputed cells the local side won; they stay pending and must be re-sent
    pub retained: BTreeSet<CellId>,
}

#[derive(Debug)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    /// Last authority effect seen per cell
    authority: HashMap<CellId, (CellEffect, Timestamp)>,
    conflicts: VecDeque<ZoneConflict>,
    max_retained: usize,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy, max_retained: usize) -> Self {
        ConflictResolver {
            policy,
            authority: HashMap::new(),
            conflicts: VecDeque::new(),
            max_retained: max_retained.max(1),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Conflict record for `local` against `server`, or `None` if they do not collide
    pub fn resolve(&self, local: &PendingChange, server: &ZoneDelta) -> Option<ZoneConflict> {
        self.reconcile(&local.delta, server).conflict
    }

    /// Decide every overlapping cell between a local delta and an authority delta
    pub fn reconcile(&self, local: &ZoneDelta, server: &ZoneDelta) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        if server.timestamp < local.timestamp {
            return outcome;
        }
        let mut disputed = BTreeSet::new();

        for cell in local.touched() {
            let (Some(mine), Some(theirs)) = (local.effect_on(&cell), server.effect_on(&cell))
            else {
                continue;
            };
            if mine == theirs {
                outcome.settled.insert(cell);
                continue;
            }
            if !mine.disagrees_with(theirs) {
                continue;
            }
            match self.policy.winner() {
                DeltaSource::Server => outcome.settled.insert(cell.clone()),
                DeltaSource::Manager => outcome.retained.insert(cell.clone()),
            };
            disputed.insert(cell);
        }

        if !disputed.is_empty() {
            outcome.conflict = Some(ZoneConflict {
                local_change: local.clone(),
                server_change: server.clone(),
                resolution: self.policy.resolution(),
                timestamp: local.timestamp.max(server.timestamp),
                cells: disputed,
            });
        }
        outcome
    }

    /// Reconcile a new local delta against authority changes it does not postdate
    pub fn screen_stale(&self, local: &ZoneDelta) -> Reconciliation {
        let mut newer = ZoneDelta::new(DeltaSource::Server, Timestamp::default());
        for cell in local.touched() {
            let Some(&(effect, at)) = self.authority.get(&cell) else {
                continue;
            };
            if at < local.timestamp {
                continue;
            }
            match effect {
                CellEffect::Present => newer.added.insert(cell),
                CellEffect::Absent => newer.removed.insert(cell),
                CellEffect::Retagged => newer.modified.insert(cell),
            };
            newer.timestamp = newer.timestamp.max(at);
        }

        if newer.is_empty() {
            return Reconciliation::default();
        }

        let mut outcome = self.reconcile(local, &newer);
        // Agreeing cells of a fresh local edit stay pending; only disputes are settled here.
        if let Some(conflict) = &outcome.conflict {
            outcome.settled.retain(|cell| conflict.cells.contains(cell));
        } else {
            outcome.settled.clear();
        }
        outcome
    }

    /// Remember the authority's effect on each cell of `server`
    pub fn record_authority(&mut self, server: &ZoneDelta) {
        for cell in server.touched() {
            let Some(effect) = server.effect_on(&cell) else {
                continue;
            };
            let newer = self
                .authority
                .get(&cell)
                .map_or(true, |&(_, at)| server.timestamp >= at);
            if newer {
                self.authority.insert(cell, (effect, server.timestamp));
            }
        }
    }

    /// Part of an unmatched acknowledgment that is not superseded by pending local edits
    ///
    /// Cells still covered by the log were superseded locally; the late
    /// response for them is ignored.
    pub fn late_ack_residual(&self, ack: &ZoneDelta, log: &ChangeLog) -> ZoneDelta {
        let superseded: BTreeSet<CellId> =
            ack.touched().into_iter().filter(|cell| log.covers(cell)).collect();
        ack.without_cells(&superseded)
    }

    /// Retain a conflict for display, evicting the oldest beyond the bound
    pub fn record(&mut self, conflict: ZoneConflict) {
        self.conflicts.push_back(conflict);
        while self.conflicts.len() > self.max_retained {
            self.conflicts.pop_front();
        }
    }

    pub fn conflicts(&self) -> Vec<ZoneConflict> {
        self.conflicts.iter().cloned().collect()
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn clear_conflicts(&mut self) {
        self.conflicts.clear();
    }
}
