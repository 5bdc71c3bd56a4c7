/*
    errors.rs - Errors surfaced by the sync engine

    Conflicts are not errors: they always resolve to a ZoneConflict record.
*/

use crate::core_transport::TransportError;
use crate::core_zone::DeltaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid delta: {0}")]
    InvalidDelta(#[from] DeltaError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Zone sync manager has shut down")]
    ManagerClosed,
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_zone::CellId;

    #[test]
    fn test_delta_error_conversion() {
        let err: SyncError =
            DeltaError::OverlappingAddRemove { cells: vec![CellId::from("a")] }.into();
        assert!(matches!(err, SyncError::InvalidDelta(_)));
        assert!(err.to_string().starts_with("Invalid delta"));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: SyncError = TransportError::Closed.into();
        assert!(matches!(err, SyncError::Transport(TransportError::Closed)));
    }
}
