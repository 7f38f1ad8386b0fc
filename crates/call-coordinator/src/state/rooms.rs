//! Room membership table.
//!
//! Rooms are named voice channels created implicitly on first join and
//! pruned when the last member leaves. Member lists are kept in join order
//! so that `existing-room-peers` enumerations are stable and testable.
//!
//! The table is policy-free: the one-room-per-connection rule is applied by
//! the coordinator actor, which sees both the old and new membership.

use signal_protocol::ConnectionId;
use std::collections::HashMap;

/// Result of a room join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoin {
    /// Whether this join created the room.
    pub newly_created: bool,
    /// The *other* members already present, in join order.
    pub existing_members: Vec<ConnectionId>,
}

/// Mapping from room name to member handles in join order.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, Vec<ConnectionId>>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle to a room, creating the room if needed.
    ///
    /// Idempotent: re-joining returns the same view without duplicating
    /// membership. `existing_members` never contains the joiner itself.
    pub fn join(&mut self, room: &str, handle: ConnectionId) -> RoomJoin {
        let newly_created = !self.rooms.contains_key(room);
        let members = self.rooms.entry(room.to_string()).or_default();

        let existing_members: Vec<ConnectionId> =
            members.iter().filter(|m| **m != handle).copied().collect();

        if !members.contains(&handle) {
            members.push(handle);
        }

        RoomJoin {
            newly_created,
            existing_members,
        }
    }

    /// Remove a handle from a room.
    ///
    /// Returns the remaining members if the handle was a member, `None`
    /// otherwise. Empty rooms are pruned.
    pub fn leave(&mut self, room: &str, handle: ConnectionId) -> Option<Vec<ConnectionId>> {
        let members = self.rooms.get_mut(room)?;
        if !members.contains(&handle) {
            return None;
        }
        members.retain(|m| *m != handle);

        let remaining = members.clone();
        if remaining.is_empty() {
            self.rooms.remove(room);
        }
        Some(remaining)
    }

    /// Remove a handle from every room it belongs to (disconnect cleanup).
    ///
    /// Returns `(room_name, remaining_members)` pairs for every affected
    /// room, sorted by room name for deterministic notification order.
    pub fn remove_from_all(&mut self, handle: ConnectionId) -> Vec<(String, Vec<ConnectionId>)> {
        let mut affected: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(&handle))
            .map(|(name, _)| name.clone())
            .collect();
        affected.sort();

        affected
            .into_iter()
            .filter_map(|room| {
                let remaining = self.leave(&room, handle)?;
                Some((room, remaining))
            })
            .collect()
    }

    /// Member handles of a room, in join order.
    #[must_use]
    pub fn members(&self, room: &str) -> Option<&[ConnectionId]> {
        self.rooms.get(room).map(Vec::as_slice)
    }

    /// Names of every room the handle belongs to, sorted.
    #[must_use]
    pub fn rooms_of(&self, handle: ConnectionId) -> Vec<String> {
        let mut names: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(&handle))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live (non-empty) rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
