//! Message types for the coordinator actor.
//!
//! All communication with the coordinator uses strongly-typed message
//! passing via `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`.
//! Client traffic arrives pre-decoded as [`ClientEvent`] frames wrapped in
//! `Inbound`, so the actor is testable without any network.

use crate::errors::CoordinatorError;
use signal_protocol::events::{ClientEvent, ServerEvent};
use signal_protocol::{ConnectionId, Identity, SessionId};
use tokio::sync::{mpsc, oneshot};

/// Messages sent to the coordinator actor.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A verified connection came up. The transport has already run
    /// identity verification; no registry entry exists yet.
    Connect {
        connection_id: ConnectionId,
        identity: Identity,
        /// Outbound event queue drained by the connection's socket writer.
        sender: mpsc::Sender<ServerEvent>,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// A connection closed (socket loss or explicit logout). Cleanup of
    /// registry, rooms, and sessions happens as one handler invocation.
    Disconnect { connection_id: ConnectionId },

    /// A decoded client frame from a registered connection.
    Inbound {
        connection_id: ConnectionId,
        event: ClientEvent,
    },

    /// A ring timer fired. Loses silently against an earlier accept/reject.
    RingTimeout { session_id: SessionId },

    /// Presence listing for broadcast logic.
    ListOnline {
        respond_to: oneshot::Sender<Vec<Identity>>,
    },

    /// Current table sizes (for health/debugging).
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Drain and stop: close every connection queue and exit the loop.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Snapshot of coordinator table sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Live registered connections.
    pub connections: usize,
    /// Non-empty voice rooms.
    pub rooms: usize,
    /// Non-terminal call sessions.
    pub active_calls: usize,
    /// Whether shutdown has begun.
    pub is_shutting_down: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_snapshot_is_copyable() {
        let status = CoordinatorStatus {
            connections: 2,
            rooms: 1,
            active_calls: 0,
            is_shutting_down: false,
        };
        let copy = status;
        assert_eq!(copy, status);
    }
}
