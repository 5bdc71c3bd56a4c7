/*
    Zone model - cells, snapshots and deltas

    HexDiffModel lives in hex_diff.rs: pure diff/apply over ZoneSnapshot.
*/

pub mod hex_diff;
pub mod types;

pub use hex_diff::{apply, diff, fold};
pub use types::{
    CellEffect, CellId, DeltaError, DeltaSource, GeoPoint, Timestamp, ZoneDelta, ZoneSnapshot,
};
