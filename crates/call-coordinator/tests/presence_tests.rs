//! Presence behavior: `list_online` consistency and broadcast
//! notifications across register/unregister sequences.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use call_coordinator::actors::{CoordinatorHandle, CoordinatorMetrics};
use signal_protocol::UserId;
use signal_test_utils::TestClient;
use std::time::Duration;

fn spawn_coordinator() -> CoordinatorHandle {
    CoordinatorHandle::new(
        "sb-presence-test".to_string(),
        Duration::from_secs(30),
        CoordinatorMetrics::new(),
    )
}

#[tokio::test]
async fn test_list_online_has_no_ghosts_and_no_omissions() {
    let handle = spawn_coordinator();

    // Arbitrary connect/disconnect interleaving; the listing must always
    // equal exactly the currently-registered users.
    let a = TestClient::connect(&handle, "alice").await;
    let b = TestClient::connect(&handle, "bob").await;
    let c = TestClient::connect(&handle, "carol").await;

    let users: Vec<UserId> = handle
        .list_online()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.user_id)
        .collect();
    assert_eq!(
        users,
        vec![UserId::from("alice"), UserId::from("bob"), UserId::from("carol")]
    );

    b.disconnect().await;
    let users: Vec<UserId> = handle
        .list_online()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.user_id)
        .collect();
    assert_eq!(users, vec![UserId::from("alice"), UserId::from("carol")]);

    a.disconnect().await;
    c.disconnect().await;
    assert!(handle.list_online().await.unwrap().is_empty());

    handle.cancel();
}

#[tokio::test]
async fn test_second_device_keeps_user_listed_once() {
    let handle = spawn_coordinator();

    let desk = TestClient::connect(&handle, "alice").await;
    let _phone = TestClient::connect(&handle, "alice").await;

    let online = handle.list_online().await.unwrap();
    assert_eq!(online.len(), 1);

    // Dropping one device keeps the user online via the other.
    desk.disconnect().await;
    let online = handle.list_online().await.unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, UserId::from("alice"));

    handle.cancel();
}

#[tokio::test]
async fn test_presence_changes_reach_broadcast_subscribers() {
    let handle = spawn_coordinator();
    let mut presence = handle.subscribe_presence();

    let a = TestClient::connect(&handle, "alice").await;
    let change = presence.recv().await.unwrap();
    assert!(change.online);
    assert_eq!(change.user_id, UserId::from("alice"));

    a.disconnect().await;
    let change = presence.recv().await.unwrap();
    assert!(!change.online);
    assert_eq!(change.user_id, UserId::from("alice"));

    handle.cancel();
}
