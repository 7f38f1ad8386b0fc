//! Signaling relay - validated pass-through for offer/answer/ICE payloads.
//!
//! The relay never inspects payloads: it checks the target exists in the
//! registry, rewrites `toHandle` to `fromHandle`, and enqueues the event on
//! the target connection's queue. Per-target ordering follows from each
//! connection having a single queue drained by a single writer, fed by the
//! serial coordinator loop.

use crate::errors::CoordinatorError;
use crate::state::ConnectionRegistry;
use signal_protocol::events::ServerEvent;
use signal_protocol::{ConnectionId, SignalKind};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Forward a signaling payload to a specific target connection.
///
/// Fails with `UnknownTarget` when the target has no registry entry; the
/// error is reported to the sender and the relay keeps serving subsequent
/// messages. A full target queue drops the event with a warning rather than
/// blocking the coordinator on a slow client.
pub fn relay(
    registry: &ConnectionRegistry,
    kind: SignalKind,
    from: ConnectionId,
    to: ConnectionId,
    payload: Value,
) -> Result<(), CoordinatorError> {
    let entry = registry
        .lookup(to)
        .ok_or(CoordinatorError::UnknownTarget(to))?;

    let event = match kind {
        SignalKind::Offer => ServerEvent::SignalOffer {
            from_handle: from,
            payload,
        },
        SignalKind::Answer => ServerEvent::SignalAnswer {
            from_handle: from,
            payload,
        },
        SignalKind::IceCandidate => ServerEvent::SignalIce {
            from_handle: from,
            payload,
        },
    };

    match entry.sender.try_send(event) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            warn!(
                target: "sb.relay",
                from = %from,
                to = %to,
                kind = kind.as_str(),
                "Target queue full, signaling event dropped"
            );
            Ok(())
        }
        Err(TrySendError::Closed(_)) => {
            // Target is mid-disconnect; cleanup will remove the entry.
            debug!(
                target: "sb.relay",
                from = %from,
                to = %to,
                "Target queue closed, signaling event dropped"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use signal_protocol::{Identity, UserId};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: UserId::from(user),
            username: user.to_string(),
            avatar_url: None,
        }
    }

    #[test]
    fn test_relay_rewrites_to_handle_as_from_handle() {
        let mut registry = ConnectionRegistry::new();
        let (from, to) = (ConnectionId::new(), ConnectionId::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(to, identity("bob"), tx).unwrap();

        let payload = json!({"candidate": "candidate:0 1 UDP ..."});
        relay(&registry, SignalKind::IceCandidate, from, to, payload.clone()).unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::SignalIce {
                from_handle,
                payload: p,
            } => {
                assert_eq!(from_handle, from);
                assert_eq!(p, payload);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_relay_to_unknown_target_fails_without_poisoning_the_relay() {
        let mut registry = ConnectionRegistry::new();
        let (from, known) = (ConnectionId::new(), ConnectionId::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(known, identity("bob"), tx).unwrap();

        let unknown = ConnectionId::new();
        let result = relay(&registry, SignalKind::Offer, from, unknown, json!({}));
        assert!(matches!(
            result,
            Err(CoordinatorError::UnknownTarget(t)) if t == unknown
        ));

        // Subsequent relays still work.
        relay(&registry, SignalKind::Offer, from, known, json!({"sdp": "v=0"})).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::SignalOffer { .. }
        ));
    }

    #[test]
    fn test_relay_preserves_sender_order_per_target() {
        let mut registry = ConnectionRegistry::new();
        let (from, to) = (ConnectionId::new(), ConnectionId::new());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(to, identity("bob"), tx).unwrap();

        relay(&registry, SignalKind::Offer, from, to, json!({"seq": 1})).unwrap();
        relay(&registry, SignalKind::IceCandidate, from, to, json!({"seq": 2})).unwrap();
        relay(&registry, SignalKind::IceCandidate, from, to, json!({"seq": 3})).unwrap();

        let seqs: Vec<i64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                ServerEvent::SignalOffer { payload, .. }
                | ServerEvent::SignalIce { payload, .. } => {
                    payload["seq"].as_i64().unwrap()
                }
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_relay_drops_on_full_queue_without_error() {
        let mut registry = ConnectionRegistry::new();
        let (from, to) = (ConnectionId::new(), ConnectionId::new());
        let (tx, _rx) = mpsc::channel(1);
        registry.register(to, identity("bob"), tx).unwrap();

        relay(&registry, SignalKind::Offer, from, to, json!({})).unwrap();
        // Queue is now full; the next relay drops but does not fail.
        relay(&registry, SignalKind::Answer, from, to, json!({})).unwrap();
    }
}
