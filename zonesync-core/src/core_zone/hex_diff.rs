/*
    hex_diff.rs - Snapshot diffing and delta application

    diff(before, after):
      added    = after.cells  \ before.cells
      removed  = before.cells \ after.cells
      modified = ∅ (reserved for metadata-only changes)

    apply(snapshot, delta):
      cells = (snapshot.cells \ delta.removed) ∪ delta.added
      modified cells still present are re-tagged in place

    Both are pure. Applying a delta twice equals applying it once.
*/

use super::types::{DeltaSource, Timestamp, ZoneDelta, ZoneSnapshot};

/// Compute the delta that turns `before` into `after`
///
/// The result is a local delta with a zero timestamp; callers stamp it with
/// [`ZoneDelta::at`] before submitting.
pub fn diff(before: &ZoneSnapshot, after: &ZoneSnapshot) -> ZoneDelta {
    let mut delta = ZoneDelta::new(DeltaSource::Manager, Timestamp::default());
    delta.added = after.cells.difference(&before.cells).cloned().collect();
    delta.removed = before.cells.difference(&after.cells).cloned().collect();
    delta
}

/// Fold `delta` into `snapshot`
pub fn apply(snapshot: &ZoneSnapshot, delta: &ZoneDelta) -> ZoneSnapshot {
    let mut next = snapshot.clone();

    for cell in &delta.removed {
        next.cells.remove(cell);
        next.tags.remove(cell);
    }
    for cell in &delta.added {
        next.cells.insert(cell.clone());
        next.tags.insert(cell.clone(), delta.timestamp);
    }
    for cell in &delta.modified {
        if next.cells.contains(cell) {
            next.tags.insert(cell.clone(), delta.timestamp);
        }
    }

    next
}

/// Fold a sequence of deltas into `snapshot`, in order
pub fn fold<'a, I>(snapshot: &ZoneSnapshot, deltas: I) -> ZoneSnapshot
where
    I: IntoIterator<Item = &'a ZoneDelta>,
{
    deltas
        .into_iter()
        .fold(snapshot.clone(), |acc, delta| apply(&acc, delta))
}
