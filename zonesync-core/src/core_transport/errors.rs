/*
    errors.rs - Transport and wire protocol errors

    TransportError drives the reconnect sequence and never loses buffered
    outbound messages. ProtocolError covers undecodable inbound frames, which
    are logged and dropped.
*/

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Failed to send: {0}")]
    SendFailed(String),

    #[error("No acknowledgment for message {message_id}")]
    AckTimeout { message_id: String },

    #[error("No heartbeat response within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Transport channel is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}
