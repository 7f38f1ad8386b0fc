//! The coordinator actor - owns every shared table.
//!
//! One actor per coordinator instance. The actor owns the connection
//! registry, the room table, and the call table, and processes one message
//! to completion before the next: each handler is a pure state transition
//! over the tables plus a batch of outbound enqueues. Nothing awaits while
//! a table is mid-mutation, so observers never see partial state (a
//! disconnecting connection is gone from the registry, every room, and
//! every session in one observable step).
//!
//! # Lifecycle
//!
//! 1. Created by [`CoordinatorHandle::new`], which spawns the message loop
//! 2. Runs until `Shutdown` is received or the root token is cancelled
//! 3. Ring timers are spawned per ringing session as children of the
//!    session's cancellation token

use crate::errors::CoordinatorError;
use crate::relay;
use crate::state::{CallTable, ConnectionRegistry, PresenceChange, RoomTable};

use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::CoordinatorMetrics;

use signal_protocol::events::{ClientEvent, ServerEvent};
use signal_protocol::{ConnectionId, Identity, SessionId, SignalKind, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Handle to the coordinator actor.
///
/// Cloneable; the transport layer holds one per connection task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    presence: broadcast::Sender<PresenceChange>,
}

impl CoordinatorHandle {
    /// Spawn the coordinator actor and return a handle to it.
    #[must_use]
    pub fn new(
        node_id: String,
        ring_timeout: Duration,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let registry = ConnectionRegistry::new();
        let presence = registry.presence_sender();

        let actor = CoordinatorActor {
            node_id,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            registry,
            rooms: RoomTable::new(),
            calls: CallTable::new(),
            ring_timeout,
            metrics,
            is_shutting_down: false,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            presence,
        }
    }

    /// Register a verified connection.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Connect {
                connection_id,
                identity,
                sender,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Report a connection as closed. Idempotent.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), CoordinatorError> {
        self.sender
            .send(CoordinatorMessage::Disconnect { connection_id })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Forward a decoded client frame.
    pub async fn inbound(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(CoordinatorMessage::Inbound {
                connection_id,
                event,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Presence listing for broadcast logic.
    pub async fn list_online(&self) -> Result<Vec<Identity>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::ListOnline { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Current table sizes.
    pub async fn status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Drain and stop the actor.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Subscribe to presence change notifications.
    #[must_use]
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence.subscribe()
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for transport tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The coordinator actor implementation.
struct CoordinatorActor {
    /// Coordinator instance ID.
    node_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Sender to our own mailbox, for ring timers.
    self_sender: mpsc::Sender<CoordinatorMessage>,
    /// Root cancellation token.
    cancel_token: CancellationToken,
    /// Who is online.
    registry: ConnectionRegistry,
    /// Voice room membership.
    rooms: RoomTable,
    /// Call session state machines.
    calls: CallTable,
    /// How long an unanswered call rings.
    ring_timeout: Duration,
    /// Shared metrics.
    metrics: Arc<CoordinatorMetrics>,
    /// Whether shutdown has begun.
    is_shutting_down: bool,
}

impl CoordinatorActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "sb.coordinator", fields(node_id = %self.node_id))]
    async fn run(mut self) {
        info!(
            target: "sb.coordinator",
            node_id = %self.node_id,
            "Coordinator started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sb.coordinator",
                        node_id = %self.node_id,
                        "Coordinator received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message);
                            self.metrics.record_event_processed();
                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sb.coordinator",
                                node_id = %self.node_id,
                                "Coordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sb.coordinator",
            node_id = %self.node_id,
            connections_remaining = self.registry.len(),
            "Coordinator stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: CoordinatorMessage) -> bool {
        match message {
            CoordinatorMessage::Connect {
                connection_id,
                identity,
                sender,
                respond_to,
            } => {
                let result = self.handle_connect(connection_id, identity, sender);
                let _ = respond_to.send(result);
                false
            }

            CoordinatorMessage::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id);
                false
            }

            CoordinatorMessage::Inbound {
                connection_id,
                event,
            } => {
                self.handle_inbound(connection_id, event);
                false
            }

            CoordinatorMessage::RingTimeout { session_id } => {
                self.handle_ring_timeout(session_id);
                false
            }

            CoordinatorMessage::ListOnline { respond_to } => {
                let _ = respond_to.send(self.registry.list_online());
                false
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(CoordinatorStatus {
                    connections: self.registry.len(),
                    rooms: self.rooms.room_count(),
                    active_calls: self.calls.active_count(),
                    is_shutting_down: self.is_shutting_down,
                });
                false
            }

            CoordinatorMessage::Shutdown { respond_to } => {
                self.is_shutting_down = true;
                info!(
                    target: "sb.coordinator",
                    node_id = %self.node_id,
                    connections = self.registry.len(),
                    "Coordinator shutting down"
                );
                let _ = respond_to.send(());
                true
            }
        }
    }

    /// Register a verified connection and confirm with `welcome`.
    fn handle_connect(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<(), CoordinatorError> {
        if self.is_shutting_down {
            return Err(CoordinatorError::Internal("coordinator draining".to_string()));
        }

        let username = identity.username.clone();
        self.registry.register(connection_id, identity, sender)?;
        self.metrics.connection_opened();

        self.send_event(connection_id, ServerEvent::Welcome {
            handle: connection_id,
        });

        info!(
            target: "sb.coordinator",
            connection_id = %connection_id,
            username = %username,
            online = self.registry.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Remove a connection from the registry, every room, and every call
    /// session, notifying affected parties. Runs to completion in one
    /// handler invocation, so cleanup is atomic to observers.
    fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(entry) = self.registry.unregister(connection_id) else {
            debug!(
                target: "sb.coordinator",
                connection_id = %connection_id,
                "Disconnect for unknown connection, ignoring"
            );
            return;
        };

        for (room_name, remaining) in self.rooms.remove_from_all(connection_id) {
            for member in remaining {
                self.send_event(member, ServerEvent::RoomPeerLeft {
                    room_name: room_name.clone(),
                    handle: connection_id,
                });
            }
        }

        for torn_down in self.calls.remove_for_disconnect(connection_id) {
            let targets = match torn_down.notify {
                crate::state::calls::TeardownNotify::Counterpart(handle) => vec![handle],
                crate::state::calls::TeardownNotify::CalleeConnections(ref user) => {
                    self.registry.connections_of(user)
                }
            };
            for target in targets {
                self.send_event(target, ServerEvent::CallEnded {
                    session_id: torn_down.session_id,
                    counterpart_handle: connection_id,
                });
            }
        }

        self.metrics.connection_closed();
        self.metrics.set_active_calls(self.calls.active_count());

        info!(
            target: "sb.coordinator",
            connection_id = %connection_id,
            username = %entry.identity.username,
            online = self.registry.len(),
            "Connection cleaned up"
        );
    }

    /// Dispatch one decoded client frame.
    fn handle_inbound(&mut self, connection_id: ConnectionId, event: ClientEvent) {
        // Only registered connections may act; the transport registers
        // before forwarding frames, so this is a race with disconnect.
        let Some(entry) = self.registry.lookup(connection_id) else {
            debug!(
                target: "sb.coordinator",
                connection_id = %connection_id,
                "Frame from unregistered connection, dropping"
            );
            return;
        };
        let identity = entry.identity.clone();

        match event {
            ClientEvent::Authenticate { .. } => {
                let err = CoordinatorError::InvalidTransition(
                    "authenticate after handshake".to_string(),
                );
                warn!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    "Repeated authenticate frame"
                );
                self.send_error(connection_id, &err);
            }

            ClientEvent::JoinVoiceRoom { room_name } => {
                self.handle_join_room(connection_id, &room_name);
            }

            ClientEvent::LeaveVoiceRoom { room_name } => {
                self.handle_leave_room(connection_id, &room_name);
            }

            ClientEvent::CallInitiate { callee_id, kind } => {
                self.handle_call_initiate(connection_id, &identity, callee_id, kind);
            }

            ClientEvent::CallAccept { session_id } => {
                self.handle_call_accept(connection_id, &identity.user_id, session_id);
            }

            ClientEvent::CallReject { session_id } => {
                self.handle_call_reject(connection_id, &identity.user_id, session_id);
            }

            ClientEvent::CallEnd { session_id } => {
                self.handle_call_end(connection_id, session_id);
            }

            ClientEvent::SignalOffer { to_handle, payload } => {
                self.handle_relay(connection_id, SignalKind::Offer, to_handle, payload);
            }

            ClientEvent::SignalAnswer { to_handle, payload } => {
                self.handle_relay(connection_id, SignalKind::Answer, to_handle, payload);
            }

            ClientEvent::SignalIce { to_handle, payload } => {
                self.handle_relay(connection_id, SignalKind::IceCandidate, to_handle, payload);
            }
        }
    }

    /// Join a voice room, leaving any previous room first (one active room
    /// per connection).
    fn handle_join_room(&mut self, connection_id: ConnectionId, room_name: &str) {
        for previous in self.rooms.rooms_of(connection_id) {
            if previous == room_name {
                continue;
            }
            if let Some(remaining) = self.rooms.leave(&previous, connection_id) {
                for member in remaining {
                    self.send_event(member, ServerEvent::RoomPeerLeft {
                        room_name: previous.clone(),
                        handle: connection_id,
                    });
                }
            }
        }

        let join = self.rooms.join(room_name, connection_id);

        self.send_event(connection_id, ServerEvent::ExistingRoomPeers {
            room_name: room_name.to_string(),
            handles: join.existing_members.clone(),
        });

        for member in join.existing_members {
            self.send_event(member, ServerEvent::RoomPeerJoined {
                room_name: room_name.to_string(),
                handle: connection_id,
            });
        }

        debug!(
            target: "sb.coordinator",
            connection_id = %connection_id,
            room = %room_name,
            newly_created = join.newly_created,
            "Joined voice room"
        );
    }

    fn handle_leave_room(&mut self, connection_id: ConnectionId, room_name: &str) {
        match self.rooms.leave(room_name, connection_id) {
            Some(remaining) => {
                for member in remaining {
                    self.send_event(member, ServerEvent::RoomPeerLeft {
                        room_name: room_name.to_string(),
                        handle: connection_id,
                    });
                }
                debug!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    room = %room_name,
                    "Left voice room"
                );
            }
            None => {
                debug!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    room = %room_name,
                    "Leave for room without membership, dropping"
                );
            }
        }
    }

    /// Place a call: ring every connection of the callee, or tell the
    /// caller immediately that the callee is offline.
    fn handle_call_initiate(
        &mut self,
        connection_id: ConnectionId,
        caller: &Identity,
        callee_id: UserId,
        kind: signal_protocol::CallKind,
    ) {
        let callee_conns = self.registry.connections_of(&callee_id);
        if callee_conns.is_empty() {
            debug!(
                target: "sb.coordinator",
                connection_id = %connection_id,
                callee = %callee_id,
                "Call to offline callee"
            );
            self.send_event(connection_id, ServerEvent::CallUnavailable {
                callee_id,
            });
            return;
        }

        let (session_id, ring_token) = self.calls.insert_ringing(
            caller.user_id.clone(),
            callee_id.clone(),
            kind,
            connection_id,
        );
        self.metrics.set_active_calls(self.calls.active_count());

        // Ring timer: fires once unless the session leaves `Ringing` first,
        // which cancels the token.
        let timer_sender = self.self_sender.clone();
        let ring_timeout = self.ring_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = ring_token.cancelled() => {}
                () = tokio::time::sleep(ring_timeout) => {
                    let _ = timer_sender
                        .send(CoordinatorMessage::RingTimeout { session_id })
                        .await;
                }
            }
        });

        for conn in callee_conns {
            self.send_event(conn, ServerEvent::CallIncoming {
                session_id,
                caller_id: caller.user_id.clone(),
                caller_name: caller.username.clone(),
                kind,
            });
        }

        info!(
            target: "sb.coordinator",
            session_id = %session_id,
            caller = %caller.user_id,
            callee = %callee_id,
            kind = kind.as_str(),
            "Call ringing"
        );
    }

    fn handle_call_accept(
        &mut self,
        connection_id: ConnectionId,
        user: &UserId,
        session_id: SessionId,
    ) {
        match self.calls.accept(session_id, connection_id, user) {
            Ok(accepted) => {
                self.send_event(accepted.initiator, ServerEvent::CallAccepted {
                    session_id,
                    counterpart_handle: connection_id,
                });
                self.stop_other_ringers(session_id, &accepted.callee, connection_id);
                self.metrics.set_active_calls(self.calls.active_count());
                info!(
                    target: "sb.coordinator",
                    session_id = %session_id,
                    counterpart = %connection_id,
                    "Call accepted"
                );
            }
            Err(err) => {
                // Protocol violation: logged, the offending message dropped.
                warn!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    session_id = %session_id,
                    error = %err,
                    "Accept dropped"
                );
            }
        }
    }

    fn handle_call_reject(
        &mut self,
        connection_id: ConnectionId,
        user: &UserId,
        session_id: SessionId,
    ) {
        match self.calls.reject(session_id, user) {
            Ok(rejected) => {
                self.send_event(rejected.initiator, ServerEvent::CallRejected {
                    session_id,
                    counterpart_handle: Some(connection_id),
                });
                self.stop_other_ringers(session_id, &rejected.callee, connection_id);
                self.metrics.set_active_calls(self.calls.active_count());
                info!(
                    target: "sb.coordinator",
                    session_id = %session_id,
                    "Call rejected"
                );
            }
            Err(err) => {
                warn!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    session_id = %session_id,
                    error = %err,
                    "Reject dropped"
                );
            }
        }
    }

    fn handle_call_end(&mut self, connection_id: ConnectionId, session_id: SessionId) {
        match self.calls.end(session_id, connection_id) {
            Ok(ended) => {
                self.send_event(ended.counterpart, ServerEvent::CallEnded {
                    session_id,
                    counterpart_handle: connection_id,
                });
                self.metrics.set_active_calls(self.calls.active_count());
                info!(
                    target: "sb.coordinator",
                    session_id = %session_id,
                    "Call ended"
                );
            }
            Err(err) => {
                warn!(
                    target: "sb.coordinator",
                    connection_id = %connection_id,
                    session_id = %session_id,
                    error = %err,
                    "End dropped"
                );
            }
        }
    }

    /// Ring timer fired. Loses silently against an earlier accept/reject:
    /// the transition guard rejects anything but a still-ringing session.
    fn handle_ring_timeout(&mut self, session_id: SessionId) {
        match self.calls.timeout(session_id) {
            Ok(timed_out) => {
                self.send_event(timed_out.initiator, ServerEvent::CallRejected {
                    session_id,
                    counterpart_handle: None,
                });
                self.stop_other_ringers(session_id, &timed_out.callee, timed_out.initiator);
                self.metrics.set_active_calls(self.calls.active_count());
                info!(
                    target: "sb.coordinator",
                    session_id = %session_id,
                    "Call timed out"
                );
            }
            Err(err) => {
                debug!(
                    target: "sb.coordinator",
                    session_id = %session_id,
                    error = %err,
                    "Stale ring timeout, dropping"
                );
            }
        }
    }

    fn handle_relay(
        &mut self,
        connection_id: ConnectionId,
        kind: SignalKind,
        to_handle: ConnectionId,
        payload: serde_json::Value,
    ) {
        if let Err(err) = relay::relay(&self.registry, kind, connection_id, to_handle, payload) {
            debug!(
                target: "sb.coordinator",
                connection_id = %connection_id,
                to = %to_handle,
                kind = kind.as_str(),
                error = %err,
                "Relay failed"
            );
            self.send_error(connection_id, &err);
        }
    }

    /// Tell every *other* connection of the callee that the ring is over
    /// (another device answered, the callee rejected elsewhere, or the ring
    /// timed out).
    fn stop_other_ringers(
        &mut self,
        session_id: SessionId,
        callee: &UserId,
        counterpart_handle: ConnectionId,
    ) {
        for conn in self.registry.connections_of(callee) {
            if conn == counterpart_handle {
                continue;
            }
            self.send_event(conn, ServerEvent::CallEnded {
                session_id,
                counterpart_handle,
            });
        }
    }

    /// Enqueue an event on a connection's outbound queue.
    fn send_event(&self, target: ConnectionId, event: ServerEvent) {
        let Some(entry) = self.registry.lookup(target) else {
            debug!(
                target: "sb.coordinator",
                connection_id = %target,
                "Send to unregistered connection, dropping"
            );
            return;
        };

        match entry.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "sb.coordinator",
                    connection_id = %target,
                    "Outbound queue full, event dropped"
                );
                self.metrics.record_event_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "sb.coordinator",
                    connection_id = %target,
                    "Outbound queue closed, event dropped"
                );
            }
        }
    }

    fn send_error(&self, target: ConnectionId, err: &CoordinatorError) {
        self.send_event(target, ServerEvent::Error {
            code: err.error_code(),
            message: err.client_message(),
        });
    }
}
