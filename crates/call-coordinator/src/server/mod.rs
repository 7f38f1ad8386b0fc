//! Connection transport - the WebSocket surface clients talk to.
//!
//! One route, `GET /ws`. Authentication happens on the first frame, before
//! any coordinator state exists for the socket; after that the socket is a
//! pair of pumps between the wire and the coordinator actor.

pub mod ws;

use crate::actors::CoordinatorHandle;
use crate::auth::IdentityVerifier;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for the transport routes.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the coordinator actor.
    pub coordinator: CoordinatorHandle,
    /// Verifies the token presented in each connection's first frame.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Outbound queue depth per connection.
    pub queue_depth: usize,
}

/// Router for the signaling endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
