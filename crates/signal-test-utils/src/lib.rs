//! # Switchboard Test Utilities
//!
//! Shared fixtures and harness helpers for coordinator testing without a
//! real network: clients are mpsc-backed [`TestClient`]s connected straight
//! to a [`CoordinatorHandle`], so tests assert on the exact outbound event
//! sequences the coordinator emits.

use call_coordinator::actors::CoordinatorHandle;
use signal_protocol::events::{ClientEvent, ServerEvent};
use signal_protocol::{ConnectionId, Identity, UserId};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default timeout for expected events.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Build a test identity whose user id and username are both `name`.
#[must_use]
pub fn identity(name: &str) -> Identity {
    Identity {
        user_id: UserId::from(name),
        username: name.to_string(),
        avatar_url: None,
    }
}

/// A connection wired directly to the coordinator actor.
pub struct TestClient {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<ServerEvent>,
    handle: CoordinatorHandle,
}

impl TestClient {
    /// Register a connection for `user` and consume the `welcome` frame.
    ///
    /// # Panics
    ///
    /// Panics if registration fails or no `welcome` arrives.
    pub async fn connect(handle: &CoordinatorHandle, user: &str) -> Self {
        let id = ConnectionId::new();
        let (tx, events) = mpsc::channel(64);
        handle
            .connect(id, identity(user), tx)
            .await
            .expect("connection should register");

        let mut client = Self {
            id,
            events,
            handle: handle.clone(),
        };
        let welcome = client.expect_event().await;
        assert_eq!(welcome, ServerEvent::Welcome { handle: id });
        client
    }

    /// Send a client frame as this connection.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator mailbox is gone.
    pub async fn send(&self, event: ClientEvent) {
        self.handle
            .inbound(self.id, event)
            .await
            .expect("coordinator should accept frames");
    }

    /// Disconnect this connection.
    ///
    /// # Panics
    ///
    /// Panics if the coordinator mailbox is gone.
    pub async fn disconnect(&self) {
        self.handle
            .disconnect(self.id)
            .await
            .expect("coordinator should accept disconnects");
    }

    /// Receive the next event or panic after [`EVENT_TIMEOUT`].
    ///
    /// # Panics
    ///
    /// Panics on timeout or closed channel.
    pub async fn expect_event(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Assert no event arrives within the given window.
    ///
    /// # Panics
    ///
    /// Panics if an event arrives.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(event)) = tokio::time::timeout(window, self.events.recv()).await {
            panic!("expected silence, got {event:?}");
        }
    }
}
