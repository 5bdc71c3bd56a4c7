/*
  TransportChannel - reliable delivery of zone envelopes to the authority

  A single driver task owns the connection. Callers talk to it through an
  unbounded command channel and observe it through an event channel plus a
  `watch` of ConnectionInfo.

  Commands In:
    • Connect            ──► (re)enable connecting, skip any backoff wait
    • Disconnect         ──► close the link, stop reconnecting
    • Send(envelope)     ──► transmit now, or queue while offline
    • Forget(ids)        ──► stop tracking / drop queued copies
    • Shutdown           ──► close and exit (status Closed)

  Events Out:
    • StatusChanged(status)
    • Message(envelope)  ◄── zone_delta / zone_ack from the authority

  Driver states:

      ┌──────────┐ connect ok ┌───────────┐ link lost / timeout
      │Connecting│───────────►│ Connected │──────────────┐
      └──────────┘            └───────────┘              │
           ▲  │ fail                                     ▼
           │  └──────────► backoff wait ◄────────── Disconnected
           │                    │ attempts exhausted
           └── Connect ◄── idle ◄┘

  Invariants:
    - Queued envelopes are flushed in FIFO order on every reconnect.
    - Transmitted zone_delta envelopes stay tracked until forgotten; when the
      link drops they are requeued ahead of everything else.
    - A queued or tracked envelope is replaced by a later Send with the same
      messageId, never duplicated.
    - Malformed inbound frames are logged and dropped; they never kill the link.
*/

use super::backoff::ReconnectPolicy;
use super::connector::{Connector, Link};
use super::envelope::{Envelope, MessageKind};
use super::errors::TransportError;
use super::queue::OutboundQueue;
use crate::config::TransportConfig;
use crate::metrics::{self, record_counter, record_gauge, record_histogram};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal, after shutdown
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    pub url: String,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// Round trip of the last answered heartbeat, in milliseconds
    #[serde(rename = "latency")]
    pub latency_ms: Option<u64>,
    pub connection_id: Option<String>,
    /// Envelopes waiting for a connection
    pub queued: usize,
}

impl ConnectionInfo {
    fn new(config: &TransportConfig) -> Self {
        ConnectionInfo {
            status: ConnectionStatus::Disconnected,
            url: config.url.clone(),
            reconnect_attempts: 0,
            max_reconnect_attempts: config.max_reconnect_attempts,
            latency_ms: None,
            connection_id: None,
            queued: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    StatusChanged(ConnectionStatus),
    Message(Envelope),
}

#[derive(Debug)]
enum TransportCommand {
    Connect,
    Disconnect,
    Send(Envelope),
    Forget(Vec<String>),
    Shutdown,
}

/// Handle to the transport driver task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransportChannel {
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    info_rx: watch::Receiver<ConnectionInfo>,
}

impl TransportChannel {
    /// Spawn the driver. Inbound messages and status changes go to `event_tx`.
    pub fn spawn(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (info_tx, info_rx) = watch::channel(ConnectionInfo::new(&config));

        let driver = Driver {
            policy: ReconnectPolicy::from_config(&config),
            outbound: OutboundQueue::new(config.outbound_queue_capacity),
            wants_connection: config.auto_connect,
            config,
            connector,
            commands: command_rx,
            events: event_tx,
            info: info_tx,
            in_flight: VecDeque::new(),
            attempts: 0,
        };
        let handle = tokio::spawn(driver.run());

        (TransportChannel { command_tx, info_rx }, handle)
    }

    fn command(&self, command: TransportCommand) -> Result<(), TransportError> {
        self.command_tx.send(command).map_err(|_| TransportError::Closed)
    }

    /// Connect now, resetting an exhausted reconnect budget
    pub fn connect(&self) -> Result<(), TransportError> {
        self.command(TransportCommand::Connect)
    }

    /// Drop the connection and stay offline until [`connect`](Self::connect)
    pub fn disconnect(&self) -> Result<(), TransportError> {
        self.command(TransportCommand::Disconnect)
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.command(TransportCommand::Send(envelope))
    }

    /// Stop tracking these message ids; queued copies are dropped
    pub fn forget(&self, message_ids: Vec<String>) -> Result<(), TransportError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        self.command(TransportCommand::Forget(message_ids))
    }

    pub fn shutdown(&self) -> Result<(), TransportError> {
        self.command(TransportCommand::Shutdown)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.info_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.info_rx.borrow().status == ConnectionStatus::Connected
    }

    pub fn watch_info(&self) -> watch::Receiver<ConnectionInfo> {
        self.info_rx.clone()
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Attempt {
    Linked(Link),
    Retry,
    Stop,
}

struct Driver {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    info: watch::Sender<ConnectionInfo>,
    outbound: OutboundQueue,
    /// Transmitted zone deltas awaiting acknowledgment, oldest first
    in_flight: VecDeque<(Envelope, Instant)>,
    wants_connection: bool,
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        info!(url = %self.config.url, auto_connect = self.wants_connection, "Transport channel started");
        loop {
            let flow = if !self.wants_connection || self.policy.exhausted(self.attempts) {
                self.idle().await
            } else {
                match self.establish().await {
                    Attempt::Linked(link) => self.connected(link).await,
                    Attempt::Retry => Flow::Continue,
                    Attempt::Stop => Flow::Stop,
                }
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        self.set_status(ConnectionStatus::Closed).await;
        info!(queued = self.outbound.len(), "Transport channel closed");
    }

    /// Offline with no connection wanted: only commands move us on
    async fn idle(&mut self) -> Flow {
        match self.commands.recv().await {
            None | Some(TransportCommand::Shutdown) => Flow::Stop,
            Some(TransportCommand::Connect) => {
                self.wants_connection = true;
                self.attempts = 0;
                self.publish_attempts();
                Flow::Continue
            }
            Some(TransportCommand::Disconnect) => {
                self.wants_connection = false;
                Flow::Continue
            }
            Some(TransportCommand::Send(envelope)) => {
                self.enqueue(envelope);
                Flow::Continue
            }
            Some(TransportCommand::Forget(ids)) => {
                self.forget(&ids);
                Flow::Continue
            }
        }
    }

    async fn establish(&mut self) -> Attempt {
        if self.attempts > 0 {
            let delay = self.policy.delay(self.attempts - 1);
            debug!(attempt = self.attempts, ?delay, "Waiting before reconnect");
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = self.commands.recv() => match command {
                        None | Some(TransportCommand::Shutdown) => return Attempt::Stop,
                        Some(TransportCommand::Connect) => break,
                        Some(TransportCommand::Disconnect) => {
                            self.wants_connection = false;
                            return Attempt::Retry;
                        }
                        Some(TransportCommand::Send(envelope)) => self.enqueue(envelope),
                        Some(TransportCommand::Forget(ids)) => self.forget(&ids),
                    },
                }
            }
        }

        self.set_status(ConnectionStatus::Connecting).await;
        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.connector.connect(&self.config.url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        };

        match result {
            Ok(link) => {
                self.attempts = 0;
                self.publish_attempts();
                Attempt::Linked(link)
            }
            Err(err) => {
                self.attempts += 1;
                record_counter(metrics::RECONNECT_ATTEMPTS, 1);
                self.publish_attempts();
                if self.policy.exhausted(self.attempts) {
                    error!(
                        attempts = self.attempts,
                        error = %err,
                        "Reconnect attempts exhausted, waiting for explicit connect"
                    );
                } else {
                    warn!(attempt = self.attempts, error = %err, "Connection attempt failed");
                }
                self.set_status(ConnectionStatus::Disconnected).await;
                Attempt::Retry
            }
        }
    }

    async fn connected(&mut self, link: Link) -> Flow {
        let Link { outbound, mut inbound } = link;
        let connection_id = Uuid::new_v4().to_string();
        self.info.send_modify(|info| info.connection_id = Some(connection_id.clone()));
        self.set_status(ConnectionStatus::Connected).await;
        info!(url = %self.config.url, %connection_id, queued = self.outbound.len(), "Connected");

        if let Err(err) = self.flush(&outbound).await {
            return self.lose_connection(err).await;
        }

        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending_ping: Option<(String, Instant)> = None;

        loop {
            let deadline = self.next_deadline(&pending_ping);
            let deadline_sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(TransportCommand::Shutdown) => {
                        self.requeue_in_flight();
                        return Flow::Stop;
                    }
                    Some(TransportCommand::Connect) => {}
                    Some(TransportCommand::Disconnect) => {
                        info!(%connection_id, "Disconnect requested");
                        self.wants_connection = false;
                        self.requeue_in_flight();
                        self.drop_connection_info();
                        self.set_status(ConnectionStatus::Disconnected).await;
                        return Flow::Continue;
                    }
                    Some(TransportCommand::Send(envelope)) => {
                        self.untrack(&envelope.message_id);
                        if let Err(err) = self.transmit(&outbound, envelope).await {
                            return self.lose_connection(err).await;
                        }
                    }
                    Some(TransportCommand::Forget(ids)) => self.forget(&ids),
                },

                frame = inbound.recv() => match frame {
                    None => return self.lose_connection(TransportError::Disconnected).await,
                    Some(text) => match Envelope::decode(&text) {
                        Err(err) => {
                            warn!(error = %err, "Dropping malformed inbound message");
                            record_counter(metrics::PROTOCOL_ERRORS, 1);
                        }
                        Ok(envelope) => match envelope.kind {
                            MessageKind::Pong => {
                                let answers = pending_ping
                                    .as_ref()
                                    .is_some_and(|(id, _)| *id == envelope.message_id);
                                if answers {
                                    if let Some((_, sent_at)) = pending_ping.take() {
                                        self.record_latency(sent_at.elapsed());
                                    }
                                } else {
                                    trace!(message_id = %envelope.message_id, "Ignoring stale pong");
                                }
                            }
                            MessageKind::Ping => {
                                let pong = envelope.pong(self.config.player_id.clone());
                                if let Err(err) = self.transmit(&outbound, pong).await {
                                    return self.lose_connection(err).await;
                                }
                            }
                            MessageKind::ZoneDelta | MessageKind::ZoneAck => {
                                self.emit(TransportEvent::Message(envelope)).await;
                            }
                        },
                    },
                },

                _ = heartbeat.tick() => {
                    if pending_ping.is_none() {
                        let ping = Envelope::ping(self.config.player_id.clone(), self.config.game_id.clone());
                        pending_ping = Some((ping.message_id.clone(), Instant::now()));
                        if let Err(err) = self.transmit(&outbound, ping).await {
                            return self.lose_connection(err).await;
                        }
                    }
                },

                _ = deadline_sleep, if deadline.is_some() => {
                    if let Some(err) = self.expired(&pending_ping, Instant::now()) {
                        return self.lose_connection(err).await;
                    }
                },
            }
        }
    }

    /// Earliest heartbeat or ack deadline, if anything is outstanding
    fn next_deadline(&self, pending_ping: &Option<(String, Instant)>) -> Option<Instant> {
        let ping = pending_ping.as_ref().map(|(_, sent)| *sent + self.config.heartbeat_timeout);
        let ack = self.in_flight.front().map(|(_, sent)| *sent + self.config.ack_timeout);
        match (ping, ack) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn expired(&self, pending_ping: &Option<(String, Instant)>, now: Instant) -> Option<TransportError> {
        if let Some((_, sent)) = pending_ping {
            if *sent + self.config.heartbeat_timeout <= now {
                return Some(TransportError::HeartbeatTimeout(self.config.heartbeat_timeout));
            }
        }
        if let Some((envelope, sent)) = self.in_flight.front() {
            if *sent + self.config.ack_timeout <= now {
                return Some(TransportError::AckTimeout { message_id: envelope.message_id.clone() });
            }
        }
        None
    }

    async fn flush(&mut self, outbound: &mpsc::Sender<String>) -> Result<(), TransportError> {
        let mut flushed = 0usize;
        while let Some(envelope) = self.outbound.pop_front() {
            self.transmit(outbound, envelope).await?;
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "Flushed queued messages");
        }
        self.publish_queue();
        Ok(())
    }

    /// Write one envelope to the live link.
    ///
    /// Zone deltas are tracked before the write, so a failed write leaves
    /// them to be requeued with the rest of the in-flight set.
    async fn transmit(
        &mut self,
        outbound: &mpsc::Sender<String>,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                error!(message_id = %envelope.message_id, error = %err, "Failed to encode envelope");
                return Ok(());
            }
        };

        let is_delta = envelope.kind == MessageKind::ZoneDelta;
        let message_id = envelope.message_id.clone();
        if is_delta {
            self.in_flight.push_back((envelope, Instant::now()));
        }

        if outbound.send(text).await.is_err() {
            return Err(TransportError::SendFailed(format!("link closed while sending {}", message_id)));
        }
        if is_delta {
            record_counter(metrics::DELTAS_SENT, 1);
            trace!(%message_id, "Sent zone delta");
        }
        Ok(())
    }

    async fn lose_connection(&mut self, err: TransportError) -> Flow {
        warn!(error = %err, in_flight = self.in_flight.len(), "Connection lost");
        self.requeue_in_flight();
        self.drop_connection_info();
        self.set_status(ConnectionStatus::Disconnected).await;
        Flow::Continue
    }

    fn requeue_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        let envelopes: Vec<Envelope> = self.in_flight.drain(..).map(|(envelope, _)| envelope).collect();
        for evicted in self.outbound.requeue_front(envelopes) {
            warn!(message_id = %evicted.message_id, "Outbound queue full, dropping oldest message");
            record_counter(metrics::OUTBOUND_DROPPED, 1);
        }
        self.publish_queue();
    }

    fn enqueue(&mut self, envelope: Envelope) {
        self.untrack(&envelope.message_id);
        if let Some(evicted) = self.outbound.push_back(envelope) {
            warn!(message_id = %evicted.message_id, "Outbound queue full, dropping oldest message");
            record_counter(metrics::OUTBOUND_DROPPED, 1);
        }
        self.publish_queue();
    }

    /// Remove any queued or in-flight copy of this message
    fn untrack(&mut self, message_id: &str) {
        self.outbound.remove(message_id);
        self.in_flight.retain(|(envelope, _)| envelope.message_id != message_id);
    }

    fn forget(&mut self, message_ids: &[String]) {
        for id in message_ids {
            if self.outbound.remove(id).is_some() {
                debug!(message_id = %id, "Dropped queued message before transmission");
            }
        }
        self.in_flight.retain(|(envelope, _)| !message_ids.contains(&envelope.message_id));
        self.publish_queue();
    }

    fn record_latency(&self, elapsed: Duration) {
        let latency_ms = elapsed.as_millis() as u64;
        trace!(latency_ms, "Heartbeat answered");
        record_histogram(metrics::LATENCY_MS, latency_ms as f64);
        self.info.send_modify(|info| info.latency_ms = Some(latency_ms));
    }

    fn publish_queue(&self) {
        let queued = self.outbound.len();
        record_gauge(metrics::OUTBOUND_QUEUED, queued as f64);
        self.info.send_if_modified(|info| {
            let changed = info.queued != queued;
            info.queued = queued;
            changed
        });
    }

    fn publish_attempts(&self) {
        let attempts = self.attempts;
        self.info.send_modify(|info| info.reconnect_attempts = attempts);
    }

    fn drop_connection_info(&self) {
        self.info.send_modify(|info| info.connection_id = None);
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        let changed = self.info.send_if_modified(|info| {
            let changed = info.status != status;
            info.status = status;
            changed
        });
        if changed {
            debug!(%status, "Connection status changed");
            self.emit(TransportEvent::StatusChanged(status)).await;
        }
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            trace!("Transport event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_transport::memory::memory_pair;
    use crate::core_zone::ZoneDelta;
    use crate::test_utils::recv_timeout;

    fn test_config() -> TransportConfig {
        TransportConfig {
            url: "memory".to_string(),
            player_id: "p1".to_string(),
            game_id: "g1".to_string(),
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(50),
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 3,
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(60),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn test_connection_info_serializes_latency_key() {
        let mut info = ConnectionInfo::new(&test_config());
        info.latency_ms = Some(42);
        info.status = ConnectionStatus::Connected;

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["latency"], serde_json::json!(42));
        assert!(value.get("latencyMs").is_none());
        assert_eq!(value["status"], serde_json::json!("connected"));
        assert_eq!(value["maxReconnectAttempts"], serde_json::json!(info.max_reconnect_attempts));
    }

    fn delta_envelope(id: &str, cell: &str) -> Envelope {
        Envelope::zone_delta(&ZoneDelta::local().add(cell), id, "p1", "g1").unwrap()
    }

    async fn wait_for_status(
        events: &mut mpsc::Receiver<TransportEvent>,
        wanted: ConnectionStatus,
    ) {
        loop {
            match recv_timeout(events, Duration::from_secs(2)).await {
                Ok(TransportEvent::StatusChanged(status)) if status == wanted => return,
                Ok(_) => continue,
                Err(e) => panic!("waiting for {:?}: {}", wanted, e),
            }
        }
    }

    #[tokio::test]
    async fn test_connects_and_sends() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let (channel, _task) = TransportChannel::spawn(test_config(), Arc::new(connector), event_tx);

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        assert!(channel.is_connected());
        assert!(channel.connection_info().connection_id.is_some());

        channel.send(delta_envelope("m-1", "a")).unwrap();
        let received = peer.next_envelope().await.unwrap();
        assert_eq!(received.message_id, "m-1");
    }

    #[tokio::test]
    async fn test_queue_while_disconnected_then_flush_in_order() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let config = TransportConfig { auto_connect: false, ..test_config() };
        let (channel, _task) = TransportChannel::spawn(config, Arc::new(connector), event_tx);

        channel.send(delta_envelope("m-1", "a")).unwrap();
        channel.send(delta_envelope("m-2", "b")).unwrap();
        channel.send(delta_envelope("m-3", "c")).unwrap();
        channel.forget(vec!["m-2".to_string()]).unwrap();

        let mut info = channel.watch_info();
        tokio::time::timeout(Duration::from_secs(2), info.wait_for(|i| i.queued == 2))
            .await
            .unwrap()
            .unwrap();

        channel.connect().unwrap();
        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;

        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-1");
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-3");
        tokio::time::timeout(Duration::from_secs(2), info.wait_for(|i| i.queued == 0))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delivers_authority_messages() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let (_channel, _task) = TransportChannel::spawn(test_config(), Arc::new(connector), event_tx);

        let peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;

        assert!(peer.send_raw("{ not json").await);
        let delta = ZoneDelta::server().add("x");
        assert!(peer.push_delta(&delta, "g1").await);

        match recv_timeout(&mut events, Duration::from_secs(2)).await {
            Ok(TransportEvent::Message(envelope)) => {
                assert_eq!(envelope.kind, MessageKind::ZoneDelta);
                assert_eq!(envelope.delta().unwrap(), delta);
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_refusals() {
        let (connector, mut authority) = memory_pair();
        authority.refuse_next(2);
        let (event_tx, mut events) = mpsc::channel(100);
        let (channel, _task) = TransportChannel::spawn(test_config(), Arc::new(connector), event_tx);

        let _peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        assert_eq!(authority.connect_attempts(), 3);
        assert_eq!(channel.connection_info().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts_until_connect() {
        let (connector, mut authority) = memory_pair();
        authority.set_offline(true);
        let (event_tx, _events) = mpsc::channel(100);
        let (channel, _task) = TransportChannel::spawn(test_config(), Arc::new(connector), event_tx);

        let mut info = channel.watch_info();
        tokio::time::timeout(Duration::from_secs(2), info.wait_for(|i| i.reconnect_attempts == 3))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(authority.connect_attempts(), 3);
        assert_eq!(channel.connection_info().status, ConnectionStatus::Disconnected);

        authority.set_offline(false);
        channel.connect().unwrap();
        let _peer = authority.accept().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            info.wait_for(|i| i.status == ConnectionStatus::Connected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_unacked_deltas_resent_after_reconnect() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let (channel, _task) = TransportChannel::spawn(test_config(), Arc::new(connector), event_tx);

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        channel.send(delta_envelope("m-1", "a")).unwrap();
        channel.send(delta_envelope("m-2", "b")).unwrap();
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-1");
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-2");
        channel.forget(vec!["m-1".to_string()]).unwrap();

        // Authority drops the connection
        drop(peer);
        wait_for_status(&mut events, ConnectionStatus::Disconnected).await;

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-2");
    }

    #[tokio::test]
    async fn test_heartbeat_measures_latency() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let config = TransportConfig { heartbeat_interval: Duration::from_millis(20), ..test_config() };
        let (channel, _task) = TransportChannel::spawn(config, Arc::new(connector), event_tx);

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        // Drive the peer so pings get answered
        tokio::spawn(async move { while peer.next_envelope().await.is_some() {} });

        let mut info = channel.watch_info();
        tokio::time::timeout(Duration::from_secs(2), info.wait_for(|i| i.latency_ms.is_some()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_pong_disconnects() {
        let (connector, mut authority) = memory_pair();
        authority.set_answer_pings(false);
        let (event_tx, mut events) = mpsc::channel(100);
        let config = TransportConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_millis(40),
            ..test_config()
        };
        let (_channel, _task) = TransportChannel::spawn(config, Arc::new(connector), event_tx);

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        tokio::spawn(async move { while peer.next_envelope().await.is_some() {} });

        wait_for_status(&mut events, ConnectionStatus::Disconnected).await;
    }

    #[tokio::test]
    async fn test_ack_timeout_disconnects() {
        let (connector, mut authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let config = TransportConfig { ack_timeout: Duration::from_millis(50), ..test_config() };
        let (channel, _task) = TransportChannel::spawn(config, Arc::new(connector), event_tx);

        let mut peer = authority.accept().await.unwrap();
        wait_for_status(&mut events, ConnectionStatus::Connected).await;
        channel.send(delta_envelope("m-1", "a")).unwrap();
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-1");

        wait_for_status(&mut events, ConnectionStatus::Disconnected).await;
        // Resent on the next connection
        let mut peer = authority.accept().await.unwrap();
        assert_eq!(peer.next_envelope().await.unwrap().message_id, "m-1");
    }

    #[tokio::test]
    async fn test_shutdown_closes() {
        let (connector, _authority) = memory_pair();
        let (event_tx, mut events) = mpsc::channel(100);
        let config = TransportConfig { auto_connect: false, ..test_config() };
        let (channel, task) = TransportChannel::spawn(config, Arc::new(connector), event_tx);

        channel.shutdown().unwrap();
        wait_for_status(&mut events, ConnectionStatus::Closed).await;
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(channel.send(delta_envelope("m", "a")), Err(TransportError::Closed)));
    }
}
