//! Signaling events exchanged between clients and the coordinator.
//!
//! Event names and field names match the wire protocol exactly: kebab-case
//! `"type"` tags, camelCase fields. `ClientEvent` flows client-to-server,
//! `ServerEvent` server-to-client; the offer/answer/ICE trio appears in both
//! directions with `toHandle` rewritten to `fromHandle` by the relay.

use crate::{CallKind, ConnectionId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by a client to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// First frame on every connection: the auth token to verify.
    Authenticate { token: String },

    /// Join a named voice room (created implicitly on first join).
    #[serde(rename_all = "camelCase")]
    JoinVoiceRoom { room_name: String },

    /// Leave a voice room.
    #[serde(rename_all = "camelCase")]
    LeaveVoiceRoom { room_name: String },

    /// Place a call to another user.
    #[serde(rename_all = "camelCase")]
    CallInitiate { callee_id: UserId, kind: CallKind },

    /// Accept an incoming call.
    #[serde(rename_all = "camelCase")]
    CallAccept { session_id: SessionId },

    /// Reject an incoming call.
    #[serde(rename_all = "camelCase")]
    CallReject { session_id: SessionId },

    /// Hang up an accepted call.
    #[serde(rename_all = "camelCase")]
    CallEnd { session_id: SessionId },

    /// SDP offer for the named remote connection.
    #[serde(rename_all = "camelCase")]
    SignalOffer { to_handle: ConnectionId, payload: Value },

    /// SDP answer for the named remote connection.
    #[serde(rename_all = "camelCase")]
    SignalAnswer { to_handle: ConnectionId, payload: Value },

    /// ICE candidate for the named remote connection.
    #[serde(rename_all = "camelCase")]
    SignalIce { to_handle: ConnectionId, payload: Value },
}

/// Events sent by the coordinator to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Authentication succeeded; the client learns its own handle.
    Welcome { handle: ConnectionId },

    /// Response to a room join: the other members already present, in join
    /// order, so the client can establish a peer link to each.
    #[serde(rename_all = "camelCase")]
    ExistingRoomPeers {
        room_name: String,
        handles: Vec<ConnectionId>,
    },

    /// Another connection joined a room this client is in.
    #[serde(rename_all = "camelCase")]
    RoomPeerJoined {
        room_name: String,
        handle: ConnectionId,
    },

    /// A connection left (or disconnected from) a room this client is in.
    #[serde(rename_all = "camelCase")]
    RoomPeerLeft {
        room_name: String,
        handle: ConnectionId,
    },

    /// An incoming call is ringing on this connection.
    #[serde(rename_all = "camelCase")]
    CallIncoming {
        session_id: SessionId,
        caller_id: UserId,
        caller_name: String,
        kind: CallKind,
    },

    /// The callee has no registered connection; the call was not placed.
    #[serde(rename_all = "camelCase")]
    CallUnavailable { callee_id: UserId },

    /// The callee accepted; `counterpartHandle` is the connection to
    /// negotiate media with.
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        session_id: SessionId,
        counterpart_handle: ConnectionId,
    },

    /// The call was rejected, explicitly or by ring timeout (no handle in
    /// the timeout case).
    #[serde(rename_all = "camelCase")]
    CallRejected {
        session_id: SessionId,
        counterpart_handle: Option<ConnectionId>,
    },

    /// The call ended: hangup, counterpart disconnect, or this device lost
    /// the ring to another of the callee's connections.
    #[serde(rename_all = "camelCase")]
    CallEnded {
        session_id: SessionId,
        counterpart_handle: ConnectionId,
    },

    /// Relayed SDP offer.
    #[serde(rename_all = "camelCase")]
    SignalOffer { from_handle: ConnectionId, payload: Value },

    /// Relayed SDP answer.
    #[serde(rename_all = "camelCase")]
    SignalAnswer { from_handle: ConnectionId, payload: Value },

    /// Relayed ICE candidate.
    #[serde(rename_all = "camelCase")]
    SignalIce { from_handle: ConnectionId, payload: Value },

    /// A request on this connection failed; other connections are unaffected.
    Error { code: i32, message: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_tags_are_kebab_case() {
        let event = ClientEvent::JoinVoiceRoom {
            room_name: "lobby".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "join-voice-room");
        assert_eq!(value["roomName"], "lobby");
    }

    #[test]
    fn test_call_initiate_round_trip() {
        let event = ClientEvent::CallInitiate {
            callee_id: UserId::from("user-b"),
            kind: CallKind::Video,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"call-initiate\""));
        assert!(json.contains("\"calleeId\""));
        assert_eq!(serde_json::from_str::<ClientEvent>(&json).unwrap(), event);
    }

    #[test]
    fn test_signal_payload_is_forwarded_verbatim() {
        let payload = json!({"sdp": "v=0...", "sdpType": "offer", "extras": [1, 2, 3]});
        let to = ConnectionId::new();
        let event = ClientEvent::SignalOffer {
            to_handle: to,
            payload: payload.clone(),
        };
        let round_tripped: ClientEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        match round_tripped {
            ClientEvent::SignalOffer {
                to_handle,
                payload: p,
            } => {
                assert_eq!(to_handle, to);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_existing_room_peers_preserves_order() {
        let handles = vec![ConnectionId::new(), ConnectionId::new(), ConnectionId::new()];
        let event = ServerEvent::ExistingRoomPeers {
            room_name: "lobby".to_string(),
            handles: handles.clone(),
        };
        let round_tripped: ServerEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        match round_tripped {
            ServerEvent::ExistingRoomPeers { handles: h, .. } => assert_eq!(h, handles),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_call_rejected_omits_handle_on_timeout() {
        let event = ServerEvent::CallRejected {
            session_id: SessionId::new(),
            counterpart_handle: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "call-rejected");
        assert!(value["counterpartHandle"].is_null());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type": "drop-tables"}"#);
        assert!(result.is_err());
    }
}
