//! Switchboard Call Coordinator Library
//!
//! The coordinator is the real-time core of a browser chat/voice
//! application: it maps live connections to authenticated identities,
//! tracks voice-room membership, relays offer/answer/ICE payloads between
//! peers, and drives the call lifecycle state machine
//! (ring -> accept/reject -> active -> ended) across two parties who may
//! disconnect at any time.
//!
//! All state is transient: there is no durable store, and every table
//! self-heals on disconnect.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorActor (singleton per instance)
//! ├── ConnectionRegistry   who is online (handle -> identity + queue)
//! ├── RoomTable            voice room membership, join order preserved
//! └── CallTable            call session state machines + ring timers
//!
//! transport (axum WebSocket)
//! ├── reader task per socket: decoded frames -> CoordinatorHandle
//! └── writer task per socket: connection queue -> wire, in order
//! ```
//!
//! Every inbound event is handled to completion before the next, so
//! cross-table mutations (most importantly disconnect cleanup) are atomic
//! to observers.
//!
//! # Modules
//!
//! - [`actors`] - the coordinator actor, its messages and metrics
//! - [`auth`] - identity verification seam (token validation is external)
//! - [`config`] - service configuration from environment
//! - [`errors`] - error taxonomy with wire error codes
//! - [`observability`] - health endpoints
//! - [`relay`] - signaling pass-through
//! - [`server`] - WebSocket transport
//! - [`state`] - the owned tables

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod observability;
pub mod relay;
pub mod server;
pub mod state;
