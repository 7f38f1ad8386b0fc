//! Per-remote peer link state.
//!
//! One [`PeerLink`] per remote connection handle. The link tracks which
//! side drives negotiation, how far negotiation has progressed, and the
//! remote candidates that arrived before a remote description existed.

use signal_protocol::ConnectionId;
use serde_json::Value;

/// Which side of the link produces the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// This side offers proactively (room joiner, accepted caller).
    Initiator,
    /// This side waits for an offer and answers.
    Responder,
}

/// Negotiation progress for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Connected,
    Failed,
    Closed,
}

/// Client-local representation of one media path to a single remote.
#[derive(Debug)]
pub struct PeerLink {
    /// The remote connection handle.
    pub remote: ConnectionId,
    pub role: NegotiationRole,
    pub state: NegotiationState,
    /// Remote candidates held until a remote description exists.
    pending_candidates: Vec<Value>,
    /// Whether the one permitted restart has been spent.
    restarted: bool,
}

impl PeerLink {
    #[must_use]
    pub fn new(remote: ConnectionId, role: NegotiationRole) -> Self {
        Self {
            remote,
            role,
            state: NegotiationState::New,
            pending_candidates: Vec::new(),
            restarted: false,
        }
    }

    /// Whether a remote description has been applied, i.e. candidates can
    /// go straight to the transport instead of the buffer.
    #[must_use]
    pub fn has_remote_description(&self) -> bool {
        match self.role {
            NegotiationRole::Responder => matches!(
                self.state,
                NegotiationState::OfferReceived
                    | NegotiationState::AnswerSent
                    | NegotiationState::Connected
            ),
            NegotiationRole::Initiator => matches!(
                self.state,
                NegotiationState::AnswerReceived | NegotiationState::Connected
            ),
        }
    }

    /// Hold a remote candidate until the remote description arrives.
    pub fn buffer_candidate(&mut self, candidate: Value) {
        self.pending_candidates.push(candidate);
    }

    /// Drain the candidate buffer (in arrival order) for flushing.
    pub fn take_buffered_candidates(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Whether the one permitted in-place restart is still available.
    #[must_use]
    pub fn can_restart(&self) -> bool {
        !self.restarted
    }

    /// Spend the restart; negotiation returns to `OfferSent`.
    pub fn mark_restarted(&mut self) {
        self.restarted = true;
        self.state = NegotiationState::OfferSent;
    }
}
