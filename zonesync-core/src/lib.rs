//! Zone synchronization engine
//!
//! Keeps a client's view of a hex-cell zone consistent with an authoritative
//! server: optimistic local edits, ordered pending changes, deterministic
//! conflict resolution, and a reconnecting transport.

pub mod config;
pub mod core_sync;
pub mod core_transport;
pub mod core_zone;
pub mod logging;
pub mod metrics;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_sync::{
    ConflictPolicy, ProximityEvent, SyncError, SyncState, SyncStatus, ZoneConflict, ZoneSyncManager,
};
pub use core_transport::{ConnectionInfo, ConnectionStatus, TcpConnector, TransportChannel};
pub use core_zone::{CellId, GeoPoint, Timestamp, ZoneDelta, ZoneSnapshot};
pub use logging::{init_logging, LogLevel};
