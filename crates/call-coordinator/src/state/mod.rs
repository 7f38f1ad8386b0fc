//! Owned coordinator state tables.
//!
//! Three tables, each with a single owner (the coordinator actor) and no
//! interior locking: the actor's serial message loop is the concurrency
//! control. Tables never perform I/O; handlers mutate them to completion
//! and then emit outbound events.
//!
//! - [`registry`] - live connections and their identities
//! - [`rooms`] - voice room membership
//! - [`calls`] - call session state machines

pub mod calls;
pub mod registry;
pub mod rooms;

pub use calls::{CallTable, TornDownCall};
pub use registry::{ConnectionEntry, ConnectionRegistry, PresenceChange};
pub use rooms::{RoomJoin, RoomTable};
