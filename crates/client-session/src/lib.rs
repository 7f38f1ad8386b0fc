//! Switchboard Client Session Library
//!
//! The browser-side counterpart of the call coordinator: owns local media
//! capture, the peer-link-per-remote map, and the client's mirror of the
//! room/call state machine.
//!
//! The controller is platform-agnostic: media capture, the peer media
//! transport, and the signaling socket are traits
//! ([`media::MediaSource`], [`transport::PeerTransport`],
//! [`transport::SignalSink`]) implemented by the embedding application.
//!
//! # Negotiation shape
//!
//! - The room joiner (or accepted caller) is the initiator: it offers
//!   proactively to each remote it learns about
//! - The responder answers the offer it receives
//! - ICE candidates flow as discovered and may arrive before the remote
//!   description; the controller buffers and flushes them
//! - A failed link gets exactly one in-place restart before teardown
//!
//! # Modules
//!
//! - [`controller`] - the session controller
//! - [`media`] - capture lifecycle seam
//! - [`peer_link`] - per-remote negotiation state
//! - [`transport`] - peer transport and signaling seams

pub mod controller;
pub mod media;
pub mod peer_link;
pub mod transport;

pub use controller::{Engagement, SessionController, SessionError};
pub use media::{MediaSource, MediaTracks};
pub use peer_link::{NegotiationRole, NegotiationState, PeerLink};
pub use transport::{PeerTransport, SignalSink};
