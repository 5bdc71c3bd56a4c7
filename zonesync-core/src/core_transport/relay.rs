//! TCP relay authority.
//!
//! A stand-in game authority speaking the zonesync frame protocol: pings are
//! answered with pongs, every zone_delta is acknowledged to its sender and
//! relayed as an authority delta to the other clients of the same game.
//!
//! A client's game is learned from the first frame it sends. Clients that
//! have not sent anything yet receive relays for every game.

use super::envelope::{Envelope, MessageKind};
use super::tcp::{spawn_framed, MAX_FRAME_SIZE};
use crate::core_zone::DeltaSource;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Player id the relay signs its replies and relayed deltas with
pub const AUTHORITY_ID: &str = "authority";

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Acknowledge deltas to their sender
    pub ack: bool,
    /// Answer pings
    pub pong: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions { ack: true, pong: true }
    }
}

/// A running relay; dropping it stops accepting and relaying
#[derive(Debug)]
pub struct RelayHandle {
    addr: SocketAddr,
    clients: watch::Receiver<usize>,
    accept: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of currently connected clients
    pub fn client_count(&self) -> usize {
        *self.clients.borrow()
    }

    pub fn watch_clients(&self) -> watch::Receiver<usize> {
        self.clients.clone()
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.accept.abort();
        self.relay.abort();
    }
}

/// Serve relay clients from `listener` until the handle is dropped
pub fn serve(listener: TcpListener, options: RelayOptions) -> io::Result<RelayHandle> {
    let addr = listener.local_addr()?;
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (count_tx, clients) = watch::channel(0);

    let accept = tokio::spawn(accept_loop(listener, event_tx));
    let relay = tokio::spawn(Relay::new(options, count_tx).run(event_rx));
    Ok(RelayHandle { addr, clients, accept, relay })
}

enum RelayEvent {
    Joined(u64, mpsc::Sender<String>),
    Frame(u64, String),
    Left(u64),
}

struct Client {
    outbound: mpsc::Sender<String>,
    game_id: Option<String>,
}

impl Client {
    fn plays(&self, game_id: &str) -> bool {
        self.game_id.as_deref().map_or(true, |game| game == game_id)
    }
}

struct Relay {
    clients: HashMap<u64, Client>,
    count: watch::Sender<usize>,
    relayed: u64,
    options: RelayOptions,
}

impl Relay {
    fn new(options: RelayOptions, count: watch::Sender<usize>) -> Self {
        Relay { clients: HashMap::new(), count, relayed: 0, options }
    }

    async fn run(mut self, mut events: mpsc::Receiver<RelayEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RelayEvent::Joined(id, outbound) => {
                    info!(client = id, "Relay client connected");
                    self.clients.insert(id, Client { outbound, game_id: None });
                    self.publish_count();
                }
                RelayEvent::Left(id) => {
                    info!(client = id, "Relay client disconnected");
                    self.clients.remove(&id);
                    self.publish_count();
                }
                RelayEvent::Frame(id, frame) => self.handle_frame(id, &frame).await,
            }
        }
    }

    fn publish_count(&self) {
        self.count.send_replace(self.clients.len());
    }

    async fn handle_frame(&mut self, from: u64, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(client = from, error = %err, "Dropping malformed frame");
                return;
            }
        };
        if let Some(client) = self.clients.get_mut(&from) {
            client.game_id = Some(envelope.game_id.clone());
        }

        match envelope.kind {
            MessageKind::Ping if self.options.pong => {
                self.send_to(from, &envelope.pong(AUTHORITY_ID)).await
            }
            MessageKind::ZoneDelta => {
                debug!(client = from, message_id = %envelope.message_id, "Zone delta received");
                if self.options.ack {
                    self.send_to(from, &envelope.ack(AUTHORITY_ID)).await;
                }
                self.relay(from, &envelope).await;
            }
            _ => {}
        }
    }

    async fn relay(&mut self, from: u64, envelope: &Envelope) {
        let delta = match envelope.delta() {
            Ok(delta) => delta.from_source(DeltaSource::Server),
            Err(err) => {
                warn!(client = from, error = %err, "Undecodable zone delta");
                return;
            }
        };
        self.relayed += 1;
        let forward = Envelope::zone_delta(
            &delta,
            format!("relay-{}", self.relayed),
            AUTHORITY_ID,
            envelope.game_id.clone(),
        )
        .and_then(|forward| forward.encode());
        let forward = match forward {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Failed to encode relayed delta");
                return;
            }
        };

        let targets: Vec<u64> = self
            .clients
            .iter()
            .filter(|(id, client)| **id != from && client.plays(&envelope.game_id))
            .map(|(id, _)| *id)
            .collect();
        for id in targets {
            self.send_text(id, forward.clone()).await;
        }
    }

    async fn send_to(&mut self, id: u64, envelope: &Envelope) {
        match envelope.encode() {
            Ok(text) => self.send_text(id, text).await,
            Err(err) => warn!(client = id, error = %err, "Failed to encode reply"),
        }
    }

    async fn send_text(&mut self, id: u64, text: String) {
        let Some(client) = self.clients.get(&id) else { return };
        if client.outbound.send(text).await.is_err() {
            self.clients.remove(&id);
            self.publish_count();
        }
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::Sender<RelayEvent>) {
    let mut next_id = 0u64;
    loop {
        let socket = match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%peer, "Accepted relay connection");
                socket
            }
            Err(err) => {
                warn!(error = %err, "Accept failed");
                continue;
            }
        };
        let id = next_id;
        next_id += 1;

        let mut link = spawn_framed(socket, MAX_FRAME_SIZE);
        if events.send(RelayEvent::Joined(id, link.outbound)).await.is_err() {
            return;
        }
        let frames = events.clone();
        tokio::spawn(async move {
            while let Some(frame) = link.inbound.recv().await {
                if frames.send(RelayEvent::Frame(id, frame)).await.is_err() {
                    return;
                }
            }
            let _ = frames.send(RelayEvent::Left(id)).await;
        });
    }
}
