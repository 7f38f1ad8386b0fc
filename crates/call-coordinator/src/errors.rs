//! Coordinator error types.
//!
//! Error types map to wire `error` event codes for client responses.
//! Internal details are logged server-side but not exposed to clients.

use signal_protocol::{ConnectionId, SessionId};
use thiserror::Error;

/// Coordinator error type.
///
/// Maps to wire error codes:
/// - `MalformedEvent`: `BAD_REQUEST` (1)
/// - `AuthenticationFailed`: `UNAUTHORIZED` (2)
/// - `UnknownTarget`, `SessionNotFound`: `NOT_FOUND` (4)
/// - `DuplicateConnection`: `CONFLICT` (5)
/// - `InvalidTransition`, `AlreadyTerminal`: `PROTOCOL_VIOLATION` (8)
/// - `CalleeOffline`: `UNAVAILABLE` (9)
/// - `Internal`, `Config`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A frame could not be decoded as a protocol event.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// No valid identity was presented at connection establishment.
    /// Fatal to that connection; no registry entry is ever created.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The handle is already registered to a different identity session.
    #[error("Connection handle already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// A relay or session operation referenced a handle with no registry
    /// entry. Reported to the sender; never fatal to the relay.
    #[error("Unknown target connection: {0}")]
    UnknownTarget(ConnectionId),

    /// No session exists for the given identifier.
    #[error("Unknown call session: {0}")]
    SessionNotFound(SessionId),

    /// A session transition was requested from the wrong state or by the
    /// wrong party. Logged and dropped; the state machine is untouched.
    #[error("Invalid call transition: {0}")]
    InvalidTransition(String),

    /// A transition was attempted on a session already in a terminal state.
    #[error("Call session already terminal: {0}")]
    AlreadyTerminal(SessionId),

    /// The callee has no registered connection.
    #[error("Callee offline: {0}")]
    CalleeOffline(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CoordinatorError::MalformedEvent(_) => 1,
            CoordinatorError::AuthenticationFailed(_) => 2,
            CoordinatorError::UnknownTarget(_) | CoordinatorError::SessionNotFound(_) => 4,
            CoordinatorError::DuplicateConnection(_) => 5,
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => 6,
            CoordinatorError::InvalidTransition(_) | CoordinatorError::AlreadyTerminal(_) => 8,
            CoordinatorError::CalleeOffline(_) => 9,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::MalformedEvent(_) => "Malformed event".to_string(),
            CoordinatorError::AuthenticationFailed(_) => "Authentication failed".to_string(),
            CoordinatorError::DuplicateConnection(_) => {
                "Connection already registered".to_string()
            }
            CoordinatorError::UnknownTarget(_) => "Target connection not found".to_string(),
            CoordinatorError::SessionNotFound(_) => "Call session not found".to_string(),
            CoordinatorError::InvalidTransition(_) => "Call request not valid now".to_string(),
            CoordinatorError::AlreadyTerminal(_) => "Call already over".to_string(),
            CoordinatorError::CalleeOffline(_) => "User is offline".to_string(),
            CoordinatorError::Config(_) | CoordinatorError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signal_protocol::SessionId;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            CoordinatorError::MalformedEvent("not json".to_string()).error_code(),
            1
        );
        assert_eq!(
            CoordinatorError::AuthenticationFailed("bad token".to_string()).error_code(),
            2
        );
        assert_eq!(
            CoordinatorError::UnknownTarget(ConnectionId::new()).error_code(),
            4
        );
        assert_eq!(
            CoordinatorError::SessionNotFound(SessionId::new()).error_code(),
            4
        );
        assert_eq!(
            CoordinatorError::DuplicateConnection(ConnectionId::new()).error_code(),
            5
        );
        assert_eq!(
            CoordinatorError::Internal("boom".to_string()).error_code(),
            6
        );
        assert_eq!(
            CoordinatorError::InvalidTransition("accept from ended".to_string()).error_code(),
            8
        );
        assert_eq!(
            CoordinatorError::AlreadyTerminal(SessionId::new()).error_code(),
            8
        );
        assert_eq!(
            CoordinatorError::CalleeOffline("user-b".to_string()).error_code(),
            9
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CoordinatorError::Internal("channel send failed: receiver dropped".to_string());
        assert!(!err.client_message().contains("channel"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = CoordinatorError::AuthenticationFailed(
            "verifier rejected token sig for key kid=7".to_string(),
        );
        assert!(!err.client_message().contains("kid"));
    }
}
