//! Collaborator seams for the session controller.
//!
//! Media encoding and transport are delegated to the peer media library
//! each client embeds; signaling delivery is delegated to the socket
//! layer. The controller only drives state machines across these traits.

use signal_protocol::events::ClientEvent;
use signal_protocol::ConnectionId;
use crate::media::MediaTracks;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by the peer media transport.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Negotiation primitive failed (bad SDP, closed connection, ...).
    #[error("Peer transport error: {0}")]
    Transport(String),
}

/// Boxed future returned by [`PeerTransport`] operations.
pub type PeerFuture<T> = Pin<Box<dyn Future<Output = Result<T, PeerError>> + Send>>;

/// The peer media transport: one media path per remote handle, keyed by
/// [`ConnectionId`]. Implementations wrap the platform peer-connection API.
pub trait PeerTransport: Send + Sync {
    /// Create a media path to `remote` (if absent) and produce an offer
    /// with the given local tracks attached.
    fn create_offer(&self, remote: ConnectionId, tracks: MediaTracks) -> PeerFuture<Value>;

    /// Apply a received offer for `remote` and produce an answer with the
    /// given local tracks attached.
    fn create_answer(
        &self,
        remote: ConnectionId,
        offer: Value,
        tracks: MediaTracks,
    ) -> PeerFuture<Value>;

    /// Apply a received answer on the initiator side.
    fn apply_answer(&self, remote: ConnectionId, answer: Value) -> PeerFuture<()>;

    /// Apply a remote ICE candidate. Only called once a remote description
    /// exists; earlier candidates are buffered by the controller.
    fn add_candidate(&self, remote: ConnectionId, candidate: Value) -> PeerFuture<()>;

    /// In-place renegotiation after a connectivity failure; produces the
    /// restart offer.
    fn restart(&self, remote: ConnectionId) -> PeerFuture<Value>;

    /// Tear down the media path to `remote`. Idempotent.
    fn close(&self, remote: ConnectionId);
}

/// Outbound signaling sink (the socket layer).
pub trait SignalSink: Send + Sync {
    /// Queue an event for delivery to the coordinator.
    fn send(&self, event: ClientEvent);
}
