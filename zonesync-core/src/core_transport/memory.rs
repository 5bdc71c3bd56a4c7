//! In-process connector and scripted authority, used by tests and demos.
//!
//! [`memory_pair`] yields a [`MemoryConnector`] for the client side and a
//! [`MemoryAuthority`] that accepts its connections as [`MemoryPeer`]s. The
//! authority can refuse connections, go offline, and stop answering pings.

use super::connector::{Connector, Link, LINK_BUFFER};
use super::envelope::{Envelope, MessageKind};
use super::errors::TransportError;
use crate::core_zone::ZoneDelta;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

pub const AUTHORITY_ID: &str = "authority";

#[derive(Debug, Default)]
struct Gate {
    offline: bool,
    refuse_remaining: u32,
    attempts: u32,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    gate: Arc<Mutex<Gate>>,
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[derive(Debug)]
pub struct MemoryAuthority {
    gate: Arc<Mutex<Gate>>,
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    answer_pings: Arc<AtomicBool>,
}

/// Authority end of one accepted connection
#[derive(Debug)]
pub struct MemoryPeer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
    answer_pings: Arc<AtomicBool>,
}

pub fn memory_pair() -> (MemoryConnector, MemoryAuthority) {
    let gate = Arc::new(Mutex::new(Gate::default()));
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { gate: gate.clone(), accept_tx },
        MemoryAuthority { gate, accept_rx, answer_pings: Arc::new(AtomicBool::new(true)) },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        {
            let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            gate.attempts += 1;
            if gate.offline {
                return Err(TransportError::ConnectFailed(format!("{}: authority offline", url)));
            }
            if gate.refuse_remaining > 0 {
                gate.refuse_remaining -= 1;
                return Err(TransportError::ConnectFailed(format!("{}: connection refused", url)));
            }
        }

        let (client_tx, from_client) = mpsc::channel(LINK_BUFFER);
        let (to_client, client_rx) = mpsc::channel(LINK_BUFFER);
        // The peer shares the authority's ping switch once accepted
        let peer = MemoryPeer { from_client, to_client, answer_pings: Arc::new(AtomicBool::new(true)) };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed(format!("{}: authority gone", url)))?;
        Ok(Link { outbound: client_tx, inbound: client_rx })
    }
}

impl MemoryAuthority {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        let mut peer = self.accept_rx.recv().await?;
        peer.answer_pings = self.answer_pings.clone();
        Some(peer)
    }

    pub fn set_offline(&self, offline: bool) {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).offline = offline;
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: u32) {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).refuse_remaining = n;
    }

    /// Total connection attempts seen, including refused ones
    pub fn connect_attempts(&self) -> u32 {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner).attempts
    }

    /// Toggle automatic pong replies for all peers
    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Next non-ping envelope from the client; pings are answered or
    /// swallowed according to the authority's ping switch.
    ///
    /// Returns `None` once the client has disconnected.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            let text = self.from_client.recv().await?;
            let Ok(envelope) = Envelope::decode(&text) else {
                continue;
            };
            if envelope.kind == MessageKind::Ping {
                if self.answer_pings.load(Ordering::SeqCst) {
                    self.send(&envelope.pong(AUTHORITY_ID)).await;
                }
                continue;
            }
            return Some(envelope);
        }
    }

    /// Send an envelope to the client; false if it has disconnected
    pub async fn send(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_raw(text).await,
            Err(_) => false,
        }
    }

    pub async fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).await.is_ok()
    }

    /// Acknowledge a zone delta the client sent
    pub async fn ack(&self, envelope: &Envelope) -> bool {
        self.send(&envelope.ack(AUTHORITY_ID)).await
    }

    /// Push an authoritative delta to the client
    pub async fn push_delta(&self, delta: &ZoneDelta, game_id: &str) -> bool {
        match Envelope::zone_delta(delta, uuid::Uuid::new_v4().to_string(), AUTHORITY_ID, game_id) {
            Ok(envelope) => self.send(&envelope).await,
            Err(_) => false,
        }
    }
}
