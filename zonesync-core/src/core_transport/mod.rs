//! Connection to the authoritative server.
//!
//! [`TransportChannel`] owns one logical connection: reconnect with backoff,
//! heartbeats, offline queueing and acknowledgment tracking. The wire is
//! abstracted behind [`Connector`]; [`TcpConnector`] speaks length-prefixed
//! JSON frames and [`memory`] provides an in-process authority for tests.
//! [`relay`] is a TCP authority that relays deltas between clients.

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod envelope;
pub mod errors;
pub mod memory;
pub mod queue;
pub mod relay;
pub mod tcp;

pub use backoff::ReconnectPolicy;
pub use channel::{ConnectionInfo, ConnectionStatus, TransportChannel, TransportEvent};
pub use connector::{Connector, Link};
pub use envelope::{Envelope, MessageKind};
pub use errors::{ProtocolError, TransportError};
pub use memory::{memory_pair, MemoryAuthority, MemoryConnector, MemoryPeer};
pub use queue::OutboundQueue;
pub use relay::{serve as serve_relay, RelayHandle, RelayOptions, AUTHORITY_ID};
pub use tcp::{read_frame, spawn_framed, write_frame, TcpConnector, MAX_FRAME_SIZE};
