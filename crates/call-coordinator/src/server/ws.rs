//! Per-connection WebSocket handling.
//!
//! Lifecycle of one socket:
//!
//! 1. First frame must be `authenticate {token}`; the verifier runs before
//!    the connection is registered, and failure closes the socket with an
//!    `error` frame (`AuthenticationFailed`)
//! 2. On success the socket splits into a writer task draining the
//!    connection's event queue (order preserving) and a reader loop feeding
//!    decoded frames to the coordinator
//! 3. Any exit path enqueues exactly one `Disconnect`, which the
//!    coordinator turns into atomic registry/room/session cleanup

use super::AppState;
use crate::errors::CoordinatorError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use signal_protocol::events::{ClientEvent, ServerEvent};
use signal_protocol::ConnectionId;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a fresh socket may take to present its auth token.
const AUTH_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Drive one client socket from handshake to cleanup.
async fn handle_socket(state: AppState, mut socket: WebSocket) {
    // Authenticate before any coordinator state exists for this socket.
    let identity = match authenticate(&state, &mut socket).await {
        Ok(identity) => identity,
        Err(err) => {
            debug!(target: "sb.transport", error = %err, "Handshake failed");
            send_error_frame(&mut socket, &err).await;
            let _ = socket.close().await;
            return;
        }
    };

    let connection_id = ConnectionId::new();
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(state.queue_depth);

    if let Err(err) = state
        .coordinator
        .connect(connection_id, identity, event_tx.clone())
        .await
    {
        warn!(
            target: "sb.transport",
            connection_id = %connection_id,
            error = %err,
            "Connection registration failed"
        );
        send_error_frame(&mut socket, &err).await;
        let _ = socket.close().await;
        return;
    }

    info!(
        target: "sb.transport",
        connection_id = %connection_id,
        "Connection established"
    );

    let (mut ws_sink, mut ws_stream) = socket.split();
    let shutdown = state.coordinator.child_token();

    // Writer: drains the connection queue in order. Exits when every sender
    // (this task's clone and the registry entry) is gone or the write fails.
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(target: "sb.transport", error = %err, "Event serialization failed");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader: decode frames and hand them to the coordinator.
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(
                    target: "sb.transport",
                    connection_id = %connection_id,
                    "Transport shutting down"
                );
                break;
            }

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if state.coordinator.inbound(connection_id, event).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                // Bad frame: report to this connection only.
                                debug!(
                                    target: "sb.transport",
                                    connection_id = %connection_id,
                                    error = %err,
                                    "Malformed frame"
                                );
                                let err = CoordinatorError::MalformedEvent(err.to_string());
                                let _ = event_tx.try_send(ServerEvent::Error {
                                    code: err.error_code(),
                                    message: err.client_message(),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the websocket layer; binary
                    // frames are not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(
                            target: "sb.transport",
                            connection_id = %connection_id,
                            error = %err,
                            "Socket read error"
                        );
                        break;
                    }
                }
            }
        }
    }

    // Exactly one disconnect per socket; the coordinator cleans registry,
    // rooms, and sessions in one step regardless of how the client left.
    let _ = state.coordinator.disconnect(connection_id).await;
    drop(event_tx);
    let _ = writer.await;

    info!(
        target: "sb.transport",
        connection_id = %connection_id,
        "Connection closed"
    );
}

/// Run the first-frame auth handshake.
async fn authenticate(
    state: &AppState,
    socket: &mut WebSocket,
) -> Result<signal_protocol::Identity, CoordinatorError> {
    let first = tokio::time::timeout(AUTH_HANDSHAKE_TIMEOUT, socket.recv())
        .await
        .map_err(|_| {
            CoordinatorError::AuthenticationFailed("handshake timed out".to_string())
        })?;

    let Some(Ok(Message::Text(text))) = first else {
        return Err(CoordinatorError::AuthenticationFailed(
            "socket closed before handshake".to_string(),
        ));
    };

    let ClientEvent::Authenticate { token } = serde_json::from_str::<ClientEvent>(&text)
        .map_err(|e| CoordinatorError::AuthenticationFailed(format!("bad handshake frame: {e}")))?
    else {
        return Err(CoordinatorError::AuthenticationFailed(
            "first frame must be authenticate".to_string(),
        ));
    };

    state.verifier.verify(&token).await
}

/// Best-effort error frame on a not-yet-registered socket.
async fn send_error_frame(socket: &mut WebSocket, err: &CoordinatorError) {
    let event = ServerEvent::Error {
        code: err.error_code(),
        message: err.client_message(),
    };
    if let Ok(frame) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(frame)).await;
    }
}
