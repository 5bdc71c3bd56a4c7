/*
    manager.rs - ZoneSyncManager, the public face of one zone's sync

    One spawned task owns the SyncEngine and is the only place it is mutated.
    Three kinds of input race into it and are serialized by its select loop:

        callers (submit / server delta / subscribe)  ──► command queue ─┐
        TransportChannel (authority messages, status) ──► event queue ──┤
                                                                        ▼
                                                              reconciliation task
                                                                        │
                            watch<SyncState> + subscriber callbacks ◄───┘

    Every state change is published by value: the watch channel is replaced
    and then each subscriber is called in registration order, on the task,
    before the next input is taken. `get_state` reads the watch without
    touching the task.
*/

use super::engine::{EngineOutput, ProximityEvent, SyncEngine};
use super::errors::{SyncError, SyncResult};
use super::state_machine::SyncState;
use crate::config::Config;
use crate::core_transport::{
    ConnectionInfo, ConnectionStatus, Connector, Envelope, MessageKind, TransportChannel,
    TransportEvent,
};
use crate::core_zone::{DeltaError, ZoneDelta, ZoneSnapshot};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events from the transport buffered ahead of the reconciliation task
const TRANSPORT_EVENT_BUFFER: usize = 100;

pub type SubscriptionId = u64;

/// Subscriber callback, invoked on the reconciliation task
pub type StateCallback = Box<dyn Fn(&SyncState) + Send + 'static>;

enum ManagerCommand {
    SubmitLocal { delta: ZoneDelta, reply: oneshot::Sender<SyncResult<SyncState>> },
    SubmitZone { zone: ZoneSnapshot, reply: oneshot::Sender<SyncResult<SyncState>> },
    Proximity { event: ProximityEvent, reply: oneshot::Sender<SyncResult<SyncState>> },
    ServerDelta { delta: ZoneDelta, reply: oneshot::Sender<SyncResult<SyncState>> },
    ClearConflicts { reply: oneshot::Sender<SyncState> },
    Subscribe { callback: StateCallback, reply: oneshot::Sender<SubscriptionId> },
    Unsubscribe { id: SubscriptionId, reply: oneshot::Sender<bool> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running zone synchronization
pub struct ZoneSyncManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    state_rx: watch::Receiver<SyncState>,
    transport: TransportChannel,
}

impl ZoneSyncManager {
    /// Start synchronizing `zone_id` from `initial`, connecting through `connector`.
    ///
    /// Returns the handle and the reconciliation task; the transport driver
    /// is stopped when the reconciliation task exits.
    pub fn spawn(
        zone_id: impl Into<String>,
        initial: ZoneSnapshot,
        config: &Config,
        connector: Arc<dyn Connector>,
    ) -> (Self, JoinHandle<()>) {
        let zone_id = zone_id.into();
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (transport, _driver) =
            TransportChannel::spawn(config.transport.clone(), connector, event_tx);

        let engine = SyncEngine::new(
            zone_id.clone(),
            initial,
            config.sync.conflict_policy,
            config.sync.max_retained_conflicts,
        );
        let (state_tx, state_rx) = watch::channel(engine.state());
        let (command_tx, command_rx) = mpsc::channel(config.sync.command_buffer.max(1));

        let reconciler = Reconciler {
            engine,
            transport: transport.clone(),
            player_id: config.transport.player_id.clone(),
            game_id: config.transport.game_id.clone(),
            commands: command_rx,
            events: event_rx,
            state_tx,
            subscribers: Vec::new(),
            next_subscription: 1,
        };
        info!(
            zone = %zone_id,
            policy = %config.sync.conflict_policy,
            url = %config.transport.url,
            "Starting zone sync manager"
        );
        let handle = tokio::spawn(reconciler.run());

        (ZoneSyncManager { command_tx, state_rx, transport }, handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> SyncResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx.send(build(reply_tx)).await.map_err(|_| SyncError::ManagerClosed)?;
        reply_rx.await.map_err(|_| SyncError::ManagerClosed)
    }

    /// Apply a local edit optimistically and send it to the authority.
    ///
    /// The returned state already reflects the edit.
    pub async fn submit_local_change(&self, delta: ZoneDelta) -> SyncResult<SyncState> {
        self.request(|reply| ManagerCommand::SubmitLocal { delta, reply }).await?
    }

    /// Submit whatever differs between the current zone and `zone`
    pub async fn submit_zone(&self, zone: ZoneSnapshot) -> SyncResult<SyncState> {
        self.request(|reply| ManagerCommand::SubmitZone { zone, reply }).await?
    }

    pub async fn on_proximity_event(&self, event: ProximityEvent) -> SyncResult<SyncState> {
        self.request(|reply| ManagerCommand::Proximity { event, reply }).await?
    }

    /// Feed an authoritative delta received out of band
    pub async fn on_server_delta(&self, delta: ZoneDelta) -> SyncResult<SyncState> {
        self.request(|reply| ManagerCommand::ServerDelta { delta, reply }).await?
    }

    pub async fn clear_conflicts(&self) -> SyncResult<SyncState> {
        self.request(|reply| ManagerCommand::ClearConflicts { reply }).await
    }

    /// Register a callback; it receives the current state immediately and
    /// then every later state, in order
    pub async fn subscribe<F>(&self, callback: F) -> SyncResult<SubscriptionId>
    where
        F: Fn(&SyncState) + Send + 'static,
    {
        let callback: StateCallback = Box::new(callback);
        self.request(|reply| ManagerCommand::Subscribe { callback, reply }).await
    }

    /// Returns whether the subscription existed
    pub async fn unsubscribe(&self, id: SubscriptionId) -> SyncResult<bool> {
        self.request(|reply| ManagerCommand::Unsubscribe { id, reply }).await
    }

    /// Latest published state
    pub fn get_state(&self) -> SyncState {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.transport.connection_info()
    }

    pub fn transport(&self) -> &TransportChannel {
        &self.transport
    }

    pub fn connect(&self) -> SyncResult<()> {
        Ok(self.transport.connect()?)
    }

    pub fn disconnect(&self) -> SyncResult<()> {
        Ok(self.transport.disconnect()?)
    }

    /// Stop the reconciliation task and the transport driver
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| ManagerCommand::Shutdown { reply }).await
    }
}

struct Reconciler {
    engine: SyncEngine,
    transport: TransportChannel,
    player_id: String,
    game_id: String,
    commands: mpsc::Receiver<ManagerCommand>,
    events: mpsc::Receiver<TransportEvent>,
    state_tx: watch::Sender<SyncState>,
    subscribers: Vec<(SubscriptionId, StateCallback)>,
    next_subscription: SubscriptionId,
}

impl Reconciler {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None => break,
                    Some(ManagerCommand::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        if self.transport.shutdown().is_err() {
            debug!("Transport already closed");
        }
        info!(
            zone = %self.engine.zone_id(),
            pending = self.engine.change_log().pending_count(),
            "Zone sync manager stopped"
        );
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::SubmitLocal { delta, reply } => {
                let result = self.engine.submit_local_change(delta);
                let _ = reply.send(self.finish(result));
            }
            ManagerCommand::SubmitZone { zone, reply } => {
                let result = self.engine.submit_zone(&zone);
                let _ = reply.send(self.finish(result));
            }
            ManagerCommand::Proximity { event, reply } => {
                let result = self.engine.on_proximity_event(&event);
                let _ = reply.send(self.finish(result));
            }
            ManagerCommand::ServerDelta { delta, reply } => {
                let result = self.engine.on_server_delta(delta);
                let _ = reply.send(self.finish(result));
            }
            ManagerCommand::ClearConflicts { reply } => {
                self.engine.clear_conflicts();
                let _ = reply.send(self.publish());
            }
            ManagerCommand::Subscribe { callback, reply } => {
                let id = self.next_subscription;
                self.next_subscription += 1;
                callback(&self.engine.state());
                self.subscribers.push((id, callback));
                debug!(subscription = id, "Subscriber added");
                let _ = reply.send(id);
            }
            ManagerCommand::Unsubscribe { id, reply } => {
                let before = self.subscribers.len();
                self.subscribers.retain(|(existing, _)| *existing != id);
                let _ = reply.send(self.subscribers.len() != before);
            }
            ManagerCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StatusChanged(status) => {
                if self.engine.set_connected(status == ConnectionStatus::Connected) {
                    self.publish();
                }
            }
            TransportEvent::Message(envelope) => self.handle_message(envelope),
        }
    }

    fn handle_message(&mut self, envelope: Envelope) {
        if !self.game_id.is_empty() && envelope.game_id != self.game_id {
            debug!(game = %envelope.game_id, "Ignoring message for another game");
            return;
        }
        let delta = match envelope.delta() {
            Ok(delta) => delta,
            Err(err) => {
                warn!(message_id = %envelope.message_id, error = %err, "Undecodable zone payload");
                return;
            }
        };

        let result = match envelope.kind {
            MessageKind::ZoneDelta => self.engine.on_server_delta(delta),
            MessageKind::ZoneAck => self.engine.on_ack(delta),
            MessageKind::Ping | MessageKind::Pong => return,
        };
        if let Err(err) = self.finish(result) {
            warn!(message_id = %envelope.message_id, error = %err, "Rejected authority message");
        }
    }

    /// Dispatch engine output and publish, or surface the engine's error
    fn finish(
        &mut self,
        result: Result<EngineOutput, DeltaError>,
    ) -> SyncResult<SyncState> {
        let output = result?;
        self.dispatch(output);
        Ok(self.publish())
    }

    fn dispatch(&self, output: EngineOutput) {
        if output.is_empty() {
            return;
        }
        if self.transport.forget(output.release).is_err() {
            warn!("Transport closed, cannot release settled messages");
        }
        for entry in output.transmit {
            let envelope = match Envelope::zone_delta(
                &entry.delta,
                entry.message_id,
                self.player_id.clone(),
                self.game_id.clone(),
            ) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(change = entry.id.0, error = %err, "Failed to encode pending change");
                    continue;
                }
            };
            if self.transport.send(envelope).is_err() {
                warn!(change = entry.id.0, "Transport closed, change stays pending");
            }
        }
    }

    fn publish(&self) -> SyncState {
        let state = self.engine.state();
        self.state_tx.send_replace(state.clone());
        for (_, callback) in &self.subscribers {
            callback(&state);
        }
        state
    }
}

impl std::fmt::Debug for ZoneSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneSyncManager")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
