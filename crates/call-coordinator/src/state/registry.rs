//! Connection registry - the authoritative "who is online" table.
//!
//! Bidirectional mapping between live connection handles and verified
//! identities. Each entry also carries the connection's outbound event
//! sender, so every other component addresses peers by handle and never
//! holds a socket. Every register/unregister emits a [`PresenceChange`] on
//! a broadcast channel consumed by external presence-broadcast logic.

use crate::errors::CoordinatorError;
use signal_protocol::events::ServerEvent;
use signal_protocol::{ConnectionId, Identity, UserId};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Buffer for the presence broadcast channel. Presence consumers that lag
/// past this many events see a `Lagged` error and resnapshot.
const PRESENCE_CHANNEL_BUFFER: usize = 64;

/// One live, identity-authenticated connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    /// Verified identity attached at establishment.
    pub identity: Identity,
    /// Outbound event queue for this connection's socket writer.
    pub sender: mpsc::Sender<ServerEvent>,
    /// When the connection registered (for "online since" presence).
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Presence notification emitted on every register/unregister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub username: String,
    pub online: bool,
}

/// Registry of live connections, keyed by handle.
///
/// Enumeration order is registration order, so presence listings are
/// deterministic.
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
    /// Handles in registration order.
    order: Vec<ConnectionId>,
    presence: broadcast::Sender<PresenceChange>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (presence, _) = broadcast::channel(PRESENCE_CHANNEL_BUFFER);
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            presence,
        }
    }

    /// Subscribe to presence change notifications.
    #[must_use]
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence.subscribe()
    }

    /// Clone of the presence sender, for handing to the actor handle.
    #[must_use]
    pub(crate) fn presence_sender(&self) -> broadcast::Sender<PresenceChange> {
        self.presence.clone()
    }

    /// Record the identity for a new connection.
    ///
    /// Re-registering a handle for the same user overwrites the entry
    /// (metadata refresh); the same handle with a different user fails with
    /// `DuplicateConnection`.
    pub fn register(
        &mut self,
        handle: ConnectionId,
        identity: Identity,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<(), CoordinatorError> {
        if let Some(existing) = self.entries.get(&handle) {
            if existing.identity.user_id != identity.user_id {
                return Err(CoordinatorError::DuplicateConnection(handle));
            }
            debug!(
                target: "sb.registry",
                connection_id = %handle,
                "Re-registering connection for same user, overwriting"
            );
        } else {
            self.order.push(handle);
        }

        let change = PresenceChange {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            online: true,
        };
        self.entries.insert(handle, ConnectionEntry {
            identity,
            sender,
            connected_at: chrono::Utc::now(),
        });

        // No receivers is fine; presence broadcast is best-effort.
        let _ = self.presence.send(change);
        Ok(())
    }

    /// Look up the entry for a handle.
    #[must_use]
    pub fn lookup(&self, handle: ConnectionId) -> Option<&ConnectionEntry> {
        self.entries.get(&handle)
    }

    /// Remove the entry for a handle, returning it if present.
    pub fn unregister(&mut self, handle: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.entries.remove(&handle)?;
        self.order.retain(|h| *h != handle);

        let _ = self.presence.send(PresenceChange {
            user_id: entry.identity.user_id.clone(),
            username: entry.identity.username.clone(),
            online: false,
        });
        Some(entry)
    }

    /// Currently-online identities, deduplicated by user, in first
    /// registration order.
    #[must_use]
    pub fn list_online(&self) -> Vec<Identity> {
        let mut seen = Vec::new();
        let mut online = Vec::new();
        for handle in &self.order {
            if let Some(entry) = self.entries.get(handle) {
                if !seen.contains(&entry.identity.user_id) {
                    seen.push(entry.identity.user_id.clone());
                    online.push(entry.identity.clone());
                }
            }
        }
        online
    }

    /// All connection handles registered to a user, in registration order.
    #[must_use]
    pub fn connections_of(&self, user: &UserId) -> Vec<ConnectionId> {
        self.order
            .iter()
            .filter(|h| {
                self.entries
                    .get(h)
                    .is_some_and(|e| &e.identity.user_id == user)
            })
            .copied()
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
