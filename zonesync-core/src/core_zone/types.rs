/*
    types.rs - Zone value types

    A zone is the set of hexagonal map cells a party currently holds active.
    Snapshots are immutable values; every change between two snapshots is
    expressed as a ZoneDelta (added / removed / modified cell ids).

    Invariants:
    - Two snapshots are equal iff their cell sets are equal (center, radius,
      active flag and per-cell tags do not take part in equality).
    - A valid delta never adds and removes the same cell.
*/

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Stable identifier of a hexagonal map cell (e.g. an H3 index)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        CellId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        CellId(id.to_string())
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        CellId(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic point (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }
}

/// Immutable view of a zone at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSnapshot {
    pub center: GeoPoint,
    pub radius: f64,
    pub is_active: bool,
    pub(crate) cells: BTreeSet<CellId>,
    /// Timestamp of the delta that last added or re-tagged each cell
    #[serde(default)]
    pub(crate) tags: BTreeMap<CellId, Timestamp>,
}

impl ZoneSnapshot {
    /// Create an empty, active zone
    pub fn new(center: GeoPoint, radius: f64) -> Self {
        ZoneSnapshot {
            center,
            radius,
            is_active: true,
            cells: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Replace the cell set (tags are reset)
    pub fn with_cells<I, C>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CellId>,
    {
        self.cells = cells.into_iter().map(Into::into).collect();
        self.tags.clear();
        self
    }

    pub fn cells(&self) -> &BTreeSet<CellId> {
        &self.cells
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.cells.contains(cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Tag of a cell, if it was added or modified by a delta
    pub fn tag(&self, cell: &CellId) -> Option<Timestamp> {
        self.tags.get(cell).copied()
    }
}

impl Default for ZoneSnapshot {
    fn default() -> Self {
        ZoneSnapshot::new(GeoPoint::default(), 0.0)
    }
}

impl PartialEq for ZoneSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for ZoneSnapshot {}

/// Which side originated a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaSource {
    /// The local controlling party
    Manager,
    /// The authority
    Server,
}

impl fmt::Display for DeltaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaSource::Manager => f.write_str("manager"),
            DeltaSource::Server => f.write_str("server"),
        }
    }
}

/// What a delta does to one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellEffect {
    Present,
    Absent,
    Retagged,
}

impl CellEffect {
    /// Whether the cell is active after the effect
    pub fn is_present(self) -> bool {
        !matches!(self, CellEffect::Absent)
    }

    /// Two effects disagree when they leave the cell in different presence states
    pub fn disagrees_with(self, other: CellEffect) -> bool {
        self.is_present() != other.is_present()
    }
}

/// Invalid delta contents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta both adds and removes cells: {cells:?}")]
    OverlappingAddRemove { cells: Vec<CellId> },
}

/// Difference between two zone states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDelta {
    #[serde(default)]
    pub added: BTreeSet<CellId>,
    #[serde(default)]
    pub removed: BTreeSet<CellId>,
    #[serde(default)]
    pub modified: BTreeSet<CellId>,
    pub timestamp: Timestamp,
    pub source: DeltaSource,
}

impl ZoneDelta {
    /// Empty delta from `source` at `timestamp`
    pub fn new(source: DeltaSource, timestamp: Timestamp) -> Self {
        ZoneDelta {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            modified: BTreeSet::new(),
            timestamp,
            source,
        }
    }

    /// Empty local delta stamped now
    pub fn local() -> Self {
        Self::new(DeltaSource::Manager, Timestamp::now())
    }

    /// Empty authority delta stamped now
    pub fn server() -> Self {
        Self::new(DeltaSource::Server, Timestamp::now())
    }

    pub fn add(mut self, cell: impl Into<CellId>) -> Self {
        self.added.insert(cell.into());
        self
    }

    pub fn remove(mut self, cell: impl Into<CellId>) -> Self {
        self.removed.insert(cell.into());
        self
    }

    pub fn modify(mut self, cell: impl Into<CellId>) -> Self {
        self.modified.insert(cell.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn from_source(mut self, source: DeltaSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Every cell the delta mentions
    pub fn touched(&self) -> BTreeSet<CellId> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .cloned()
            .collect()
    }

    pub fn touches(&self, cell: &CellId) -> bool {
        self.added.contains(cell) || self.removed.contains(cell) || self.modified.contains(cell)
    }

    /// Effect of this delta on `cell`; removal beats re-tagging
    pub fn effect_on(&self, cell: &CellId) -> Option<CellEffect> {
        if self.added.contains(cell) {
            Some(CellEffect::Present)
        } else if self.removed.contains(cell) {
            Some(CellEffect::Absent)
        } else if self.modified.contains(cell) {
            Some(CellEffect::Retagged)
        } else {
            None
        }
    }

    /// Check `added ∩ removed = ∅`
    pub fn validate(&self) -> Result<(), DeltaError> {
        let cells: Vec<CellId> = self.added.intersection(&self.removed).cloned().collect();
        if cells.is_empty() {
            Ok(())
        } else {
            Err(DeltaError::OverlappingAddRemove { cells })
        }
    }

    /// Copy of this delta with `cells` dropped from all three sets
    pub fn without_cells(&self, cells: &BTreeSet<CellId>) -> ZoneDelta {
        ZoneDelta {
            added: self.added.difference(cells).cloned().collect(),
            removed: self.removed.difference(cells).cloned().collect(),
            modified: self.modified.difference(cells).cloned().collect(),
            timestamp: self.timestamp,
            source: self.source,
        }
    }

    /// Copy of this delta restricted to `cells`
    pub fn only_cells(&self, cells: &BTreeSet<CellId>) -> ZoneDelta {
        ZoneDelta {
            added: self.added.intersection(cells).cloned().collect(),
            removed: self.removed.intersection(cells).cloned().collect(),
            modified: self.modified.intersection(cells).cloned().collect(),
            timestamp: self.timestamp,
            source: self.source,
        }
    }

    /// Whether every cell-level effect of `self` is also an effect of `other`
    pub fn effects_subset_of(&self, other: &ZoneDelta) -> bool {
        self.added.is_subset(&other.added)
            && self.removed.is_subset(&other.removed)
            && self
                .modified
                .iter()
                .all(|cell| other.modified.contains(cell) || other.added.contains(cell))
    }
}
