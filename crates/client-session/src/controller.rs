//! The client session controller.
//!
//! Mirrors the coordinator's room/call state machine from the client's
//! perspective: owns local media capture, the peer-link-per-remote map, and
//! the reaction to every server event. All teardown funnels through two
//! routines - [`SessionController::teardown_link`] for one remote and
//! `release_media` for capture - so every exit path (room left, call ended,
//! negotiation failed, explicit hangup, cancelled ring) releases resources
//! exactly once.

use crate::media::{MediaError, MediaSource, MediaTracks};
use crate::peer_link::{NegotiationRole, NegotiationState, PeerLink};
use crate::transport::{PeerError, PeerTransport, SignalSink};

use signal_protocol::events::{ClientEvent, ServerEvent};
use signal_protocol::{CallKind, ConnectionId, SessionId, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Session controller errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The requested action conflicts with the current engagement.
    #[error("Already engaged: {0}")]
    AlreadyEngaged(String),

    /// The requested action needs an engagement that does not exist.
    #[error("Not engaged: {0}")]
    NotEngaged(String),

    /// Negotiation needed local media but none was acquired.
    #[error("No local media")]
    NoLocalMedia,

    /// The acquisition task died before producing tracks.
    #[error("Media acquisition interrupted: {0}")]
    AcquisitionInterrupted(String),
}

/// What this client is currently doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Engagement {
    Idle,
    /// Member of a voice room.
    Room { name: String },
    /// Placed a call, waiting for the callee.
    OutgoingRing { callee: UserId, kind: CallKind },
    /// An incoming call is ringing locally.
    IncomingRing {
        session: SessionId,
        caller: UserId,
        kind: CallKind,
    },
    /// Accepted an incoming call, waiting for the caller's offer.
    AwaitingOffer { session: SessionId },
    /// In an accepted call with a bound counterpart.
    InCall {
        session: SessionId,
        counterpart: ConnectionId,
    },
}

/// Local capture state.
enum LocalMedia {
    Idle,
    /// Acquisition in flight. The task outlives a cancelled ring so the
    /// tracks can still be released when it completes.
    Acquiring {
        task: JoinHandle<Result<MediaTracks, MediaError>>,
    },
    Ready(MediaTracks),
}

/// Client-side session controller.
pub struct SessionController {
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerTransport>,
    sink: Arc<dyn SignalSink>,
    /// One link per remote handle.
    links: HashMap<ConnectionId, PeerLink>,
    local_media: LocalMedia,
    engagement: Engagement,
    /// Our own handle, learned from `welcome`.
    own_handle: Option<ConnectionId>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        media: Arc<dyn MediaSource>,
        peers: Arc<dyn PeerTransport>,
        sink: Arc<dyn SignalSink>,
    ) -> Self {
        Self {
            media,
            peers,
            sink,
            links: HashMap::new(),
            local_media: LocalMedia::Idle,
            engagement: Engagement::Idle,
            own_handle: None,
        }
    }

    /// Current engagement, for UI state.
    #[must_use]
    pub fn engagement(&self) -> &Engagement {
        &self.engagement
    }

    /// Our own connection handle, once `welcome` has arrived.
    #[must_use]
    pub fn own_handle(&self) -> Option<ConnectionId> {
        self.own_handle
    }

    /// Remotes with a live peer link.
    #[must_use]
    pub fn remotes(&self) -> Vec<ConnectionId> {
        self.links.keys().copied().collect()
    }

    /// Join a voice room. Capture starts immediately; offers go out when
    /// `existing-room-peers` arrives.
    pub fn join_room(&mut self, name: &str) -> Result<(), SessionError> {
        match &self.engagement {
            Engagement::Idle | Engagement::Room { .. } => {}
            other => {
                return Err(SessionError::AlreadyEngaged(format!("{other:?}")));
            }
        }

        self.sink.send(ClientEvent::JoinVoiceRoom {
            room_name: name.to_string(),
        });
        self.engagement = Engagement::Room {
            name: name.to_string(),
        };
        self.begin_acquisition(CallKind::Audio);
        Ok(())
    }

    /// Leave the current room, tearing down every link and releasing
    /// capture.
    pub fn leave_room(&mut self) -> Result<(), SessionError> {
        let Engagement::Room { name } = self.engagement.clone() else {
            return Err(SessionError::NotEngaged("not in a room".to_string()));
        };

        self.sink.send(ClientEvent::LeaveVoiceRoom { room_name: name });
        self.end_engagement();
        Ok(())
    }

    /// Place a call. Capture starts while the callee rings.
    pub fn place_call(&mut self, callee: UserId, kind: CallKind) -> Result<(), SessionError> {
        if self.engagement != Engagement::Idle {
            return Err(SessionError::AlreadyEngaged(format!("{:?}", self.engagement)));
        }

        self.sink.send(ClientEvent::CallInitiate {
            callee_id: callee.clone(),
            kind,
        });
        self.engagement = Engagement::OutgoingRing { callee, kind };
        self.begin_acquisition(kind);
        Ok(())
    }

    /// Abandon an outgoing ring before the callee responds. Releases
    /// capture even if acquisition is still pending.
    pub fn cancel_ring(&mut self) -> Result<(), SessionError> {
        let Engagement::OutgoingRing { .. } = self.engagement else {
            return Err(SessionError::NotEngaged("no outgoing ring".to_string()));
        };
        self.end_engagement();
        Ok(())
    }

    /// Accept the incoming call; capture starts and the caller's offer is
    /// awaited.
    pub fn accept_call(&mut self) -> Result<(), SessionError> {
        let Engagement::IncomingRing { session, kind, .. } = self.engagement else {
            return Err(SessionError::NotEngaged("no incoming ring".to_string()));
        };

        self.sink.send(ClientEvent::CallAccept { session_id: session });
        self.engagement = Engagement::AwaitingOffer { session };
        self.begin_acquisition(kind);
        Ok(())
    }

    /// Reject the incoming call.
    pub fn reject_call(&mut self) -> Result<(), SessionError> {
        let Engagement::IncomingRing { session, .. } = self.engagement else {
            return Err(SessionError::NotEngaged("no incoming ring".to_string()));
        };

        self.sink.send(ClientEvent::CallReject { session_id: session });
        self.engagement = Engagement::Idle;
        Ok(())
    }

    /// Hang up the current call.
    pub fn hang_up(&mut self) -> Result<(), SessionError> {
        let session = match self.engagement {
            Engagement::InCall { session, .. } | Engagement::AwaitingOffer { session } => session,
            _ => return Err(SessionError::NotEngaged("no call".to_string())),
        };

        self.sink.send(ClientEvent::CallEnd { session_id: session });
        self.end_engagement();
        Ok(())
    }

    /// Forward a locally discovered ICE candidate to the remote it belongs
    /// to. Candidates may precede or follow the answer; the receiving side
    /// buffers as needed.
    pub fn on_local_candidate(&mut self, remote: ConnectionId, candidate: Value) {
        if self.links.contains_key(&remote) {
            self.sink.send(ClientEvent::SignalIce {
                to_handle: remote,
                payload: candidate,
            });
        } else {
            debug!(
                target: "sb.client",
                remote = %remote,
                "Local candidate for unknown link, dropping"
            );
        }
    }

    /// The transport reports the link came up.
    pub fn on_transport_connected(&mut self, remote: ConnectionId) {
        if let Some(link) = self.links.get_mut(&remote) {
            link.state = NegotiationState::Connected;
        }
    }

    /// The transport reports a connectivity failure: one in-place restart,
    /// then teardown.
    pub async fn on_transport_failed(&mut self, remote: ConnectionId) -> Result<(), SessionError> {
        let Some(link) = self.links.get_mut(&remote) else {
            return Ok(());
        };

        if link.can_restart() {
            link.mark_restarted();
            let offer = self.peers.restart(remote).await?;
            self.sink.send(ClientEvent::SignalOffer {
                to_handle: remote,
                payload: offer,
            });
            debug!(target: "sb.client", remote = %remote, "Link restarting");
        } else {
            warn!(target: "sb.client", remote = %remote, "Link failed twice, tearing down");
            if let Some(link) = self.links.get_mut(&remote) {
                link.state = NegotiationState::Failed;
            }
            self.teardown_link(remote);
        }
        Ok(())
    }

    /// React to one coordinator event.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match event {
            ServerEvent::Welcome { handle } => {
                self.own_handle = Some(handle);
            }

            ServerEvent::ExistingRoomPeers { handles, .. } => {
                if matches!(self.engagement, Engagement::Room { .. }) {
                    for remote in handles {
                        self.open_initiator_link(remote).await?;
                    }
                }
            }

            ServerEvent::RoomPeerJoined { handle, .. } => {
                // The joiner offers; we only pre-create the responder link.
                self.get_or_create_link(handle, NegotiationRole::Responder);
            }

            ServerEvent::RoomPeerLeft { handle, .. } => {
                self.teardown_link(handle);
            }

            ServerEvent::CallIncoming {
                session_id,
                caller_id,
                kind,
                ..
            } => {
                if self.engagement == Engagement::Idle {
                    self.engagement = Engagement::IncomingRing {
                        session: session_id,
                        caller: caller_id,
                        kind,
                    };
                } else {
                    // Busy here; decline so the caller is not left ringing.
                    self.sink.send(ClientEvent::CallReject {
                        session_id,
                    });
                }
            }

            ServerEvent::CallUnavailable { callee_id } => {
                if matches!(self.engagement, Engagement::OutgoingRing { .. }) {
                    debug!(target: "sb.client", callee = %callee_id, "Callee offline");
                    self.end_engagement();
                }
            }

            ServerEvent::CallAccepted {
                session_id,
                counterpart_handle,
            } => {
                if matches!(self.engagement, Engagement::OutgoingRing { .. }) {
                    self.engagement = Engagement::InCall {
                        session: session_id,
                        counterpart: counterpart_handle,
                    };
                    self.open_initiator_link(counterpart_handle).await?;
                }
            }

            ServerEvent::CallRejected { session_id, .. } => {
                if matches!(self.engagement, Engagement::OutgoingRing { .. }) {
                    debug!(target: "sb.client", session_id = %session_id, "Call rejected");
                    self.end_engagement();
                }
            }

            ServerEvent::CallEnded { session_id, .. } => {
                let ours = match self.engagement {
                    Engagement::InCall { session, .. }
                    | Engagement::AwaitingOffer { session }
                    | Engagement::IncomingRing { session, .. } => session == session_id,
                    _ => false,
                };
                if ours {
                    self.end_engagement();
                }
            }

            ServerEvent::SignalOffer {
                from_handle,
                payload,
            } => {
                self.handle_offer(from_handle, payload).await?;
            }

            ServerEvent::SignalAnswer {
                from_handle,
                payload,
            } => {
                self.handle_answer(from_handle, payload).await?;
            }

            ServerEvent::SignalIce {
                from_handle,
                payload,
            } => {
                self.handle_remote_candidate(from_handle, payload).await?;
            }

            ServerEvent::Error { code, message } => {
                warn!(target: "sb.client", code, message = %message, "Coordinator error");
            }
        }
        Ok(())
    }

    /// Create the initiator side of a link and send the offer. Duplicate
    /// creation for an existing remote is a no-op.
    async fn open_initiator_link(&mut self, remote: ConnectionId) -> Result<(), SessionError> {
        if self.links.contains_key(&remote) {
            return Ok(());
        }
        self.links
            .insert(remote, PeerLink::new(remote, NegotiationRole::Initiator));

        let tracks = self.ensure_media().await?;
        let offer = self.peers.create_offer(remote, tracks).await?;
        self.sink.send(ClientEvent::SignalOffer {
            to_handle: remote,
            payload: offer,
        });
        if let Some(link) = self.links.get_mut(&remote) {
            link.state = NegotiationState::OfferSent;
        }
        Ok(())
    }

    async fn handle_offer(
        &mut self,
        from: ConnectionId,
        payload: Value,
    ) -> Result<(), SessionError> {
        self.get_or_create_link(from, NegotiationRole::Responder);
        if let Some(link) = self.links.get_mut(&from) {
            link.state = NegotiationState::OfferReceived;
        }

        let tracks = self.ensure_media().await?;
        let answer = self.peers.create_answer(from, payload, tracks).await?;
        self.sink.send(ClientEvent::SignalAnswer {
            to_handle: from,
            payload: answer,
        });
        if let Some(link) = self.links.get_mut(&from) {
            link.state = NegotiationState::AnswerSent;
        }

        // The remote description now exists: drain anything that raced
        // ahead of the offer.
        self.flush_candidates(from).await?;

        // A callee waiting for the caller's offer is now fully in the call.
        if let Engagement::AwaitingOffer { session } = self.engagement {
            self.engagement = Engagement::InCall {
                session,
                counterpart: from,
            };
        }
        Ok(())
    }

    async fn handle_answer(
        &mut self,
        from: ConnectionId,
        payload: Value,
    ) -> Result<(), SessionError> {
        let Some(link) = self.links.get_mut(&from) else {
            debug!(target: "sb.client", remote = %from, "Answer for unknown link, dropping");
            return Ok(());
        };
        if link.role != NegotiationRole::Initiator {
            debug!(target: "sb.client", remote = %from, "Answer on responder link, dropping");
            return Ok(());
        }

        self.peers.apply_answer(from, payload).await?;
        if let Some(link) = self.links.get_mut(&from) {
            link.state = NegotiationState::AnswerReceived;
        }
        self.flush_candidates(from).await?;
        Ok(())
    }

    /// Remote candidates may arrive before or after the remote
    /// description; both orders are tolerated by buffering until it exists.
    async fn handle_remote_candidate(
        &mut self,
        from: ConnectionId,
        candidate: Value,
    ) -> Result<(), SessionError> {
        let link = self.get_or_create_link(from, NegotiationRole::Responder);
        if link.has_remote_description() {
            self.peers.add_candidate(from, candidate).await?;
        } else {
            link.buffer_candidate(candidate);
        }
        Ok(())
    }

    async fn flush_candidates(&mut self, remote: ConnectionId) -> Result<(), SessionError> {
        let pending = match self.links.get_mut(&remote) {
            Some(link) => link.take_buffered_candidates(),
            None => return Ok(()),
        };
        for candidate in pending {
            self.peers.add_candidate(remote, candidate).await?;
        }
        Ok(())
    }

    fn get_or_create_link(&mut self, remote: ConnectionId, role: NegotiationRole) -> &mut PeerLink {
        self.links
            .entry(remote)
            .or_insert_with(|| PeerLink::new(remote, role))
    }

    /// Tear down one link. Safe to call from every exit path; a second
    /// call for the same remote is a no-op.
    fn teardown_link(&mut self, remote: ConnectionId) {
        if self.links.remove(&remote).is_some() {
            self.peers.close(remote);
            debug!(target: "sb.client", remote = %remote, "Link torn down");
        }
    }

    /// Common tail of every engagement exit: drop all links, release
    /// capture, go idle.
    fn end_engagement(&mut self) {
        let remotes: Vec<ConnectionId> = self.links.keys().copied().collect();
        for remote in remotes {
            self.teardown_link(remote);
        }
        self.release_media();
        self.engagement = Engagement::Idle;
    }

    /// Start capture unless it is already running or done.
    fn begin_acquisition(&mut self, kind: CallKind) {
        if matches!(self.local_media, LocalMedia::Idle) {
            let media = Arc::clone(&self.media);
            let task = tokio::spawn(async move { media.acquire(kind).await });
            self.local_media = LocalMedia::Acquiring { task };
        }
    }

    /// Wait for capture to finish and return the tracks.
    async fn ensure_media(&mut self) -> Result<MediaTracks, SessionError> {
        match std::mem::replace(&mut self.local_media, LocalMedia::Idle) {
            LocalMedia::Ready(tracks) => {
                self.local_media = LocalMedia::Ready(tracks.clone());
                Ok(tracks)
            }
            LocalMedia::Acquiring { task } => match task.await {
                Ok(Ok(tracks)) => {
                    self.local_media = LocalMedia::Ready(tracks.clone());
                    Ok(tracks)
                }
                Ok(Err(err)) => Err(err.into()),
                Err(err) => Err(SessionError::AcquisitionInterrupted(err.to_string())),
            },
            LocalMedia::Idle => Err(SessionError::NoLocalMedia),
        }
    }

    /// Release capture exactly once. If acquisition is still pending, a
    /// watcher releases the tracks the moment it completes, so a cancelled
    /// ring never leaks a live microphone.
    fn release_media(&mut self) {
        match std::mem::replace(&mut self.local_media, LocalMedia::Idle) {
            LocalMedia::Ready(tracks) => self.media.release(tracks),
            LocalMedia::Acquiring { task } => {
                let media = Arc::clone(&self.media);
                tokio::spawn(async move {
                    if let Ok(Ok(tracks)) = task.await {
                        media.release(tracks);
                    }
                });
            }
            LocalMedia::Idle => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::media::AcquireFuture;
    use crate::transport::PeerFuture;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capture mock: counts acquisitions/releases, optional startup delay
    /// to model the permission prompt.
    struct MockMedia {
        delay: Duration,
        acquired: AtomicUsize,
        released: Mutex<Vec<MediaTracks>>,
    }

    impl MockMedia {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                acquired: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
            })
        }

        fn released_count(&self) -> usize {
            self.released.lock().unwrap().len()
        }
    }

    impl MediaSource for MockMedia {
        fn acquire(&self, kind: CallKind) -> AcquireFuture {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            Box::pin(async move {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                Ok(MediaTracks {
                    kind,
                    track_ids: vec!["track-0".to_string()],
                })
            })
        }

        fn release(&self, tracks: MediaTracks) {
            self.released.lock().unwrap().push(tracks);
        }
    }

    /// Peer transport mock: records operations in order.
    struct MockPeers {
        ops: Mutex<Vec<String>>,
    }

    impl MockPeers {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ops: Mutex::new(Vec::new()),
            })
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn record(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }
    }

    impl PeerTransport for MockPeers {
        fn create_offer(&self, remote: ConnectionId, _tracks: MediaTracks) -> PeerFuture<Value> {
            self.record(format!("offer:{remote}"));
            Box::pin(async move { Ok(json!({"sdp": format!("offer-for-{remote}")})) })
        }

        fn create_answer(
            &self,
            remote: ConnectionId,
            _offer: Value,
            _tracks: MediaTracks,
        ) -> PeerFuture<Value> {
            self.record(format!("answer:{remote}"));
            Box::pin(async move { Ok(json!({"sdp": format!("answer-for-{remote}")})) })
        }

        fn apply_answer(&self, remote: ConnectionId, _answer: Value) -> PeerFuture<()> {
            self.record(format!("apply-answer:{remote}"));
            Box::pin(async { Ok(()) })
        }

        fn add_candidate(&self, remote: ConnectionId, candidate: Value) -> PeerFuture<()> {
            self.record(format!("candidate:{remote}:{}", candidate["seq"]));
            Box::pin(async { Ok(()) })
        }

        fn restart(&self, remote: ConnectionId) -> PeerFuture<Value> {
            self.record(format!("restart:{remote}"));
            Box::pin(async move { Ok(json!({"sdp": format!("restart-for-{remote}")})) })
        }

        fn close(&self, remote: ConnectionId) {
            self.record(format!("close:{remote}"));
        }
    }

    /// Signaling sink mock: collects outbound events.
    struct MockSink {
        sent: Mutex<Vec<ClientEvent>>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<ClientEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SignalSink for MockSink {
        fn send(&self, event: ClientEvent) {
            self.sent.lock().unwrap().push(event);
        }
    }

    fn controller(
        media: &Arc<MockMedia>,
        peers: &Arc<MockPeers>,
        sink: &Arc<MockSink>,
    ) -> SessionController {
        SessionController::new(
            Arc::clone(media) as Arc<dyn MediaSource>,
            Arc::clone(peers) as Arc<dyn PeerTransport>,
            Arc::clone(sink) as Arc<dyn SignalSink>,
        )
    }

    #[tokio::test]
    async fn test_room_join_offers_to_each_existing_peer() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        ctl.handle_server_event(ServerEvent::ExistingRoomPeers {
            room_name: "lobby".to_string(),
            handles: vec![a, b],
        })
        .await
        .unwrap();

        assert_eq!(peers.ops(), vec![format!("offer:{a}"), format!("offer:{b}")]);
        let offers: Vec<_> = sink
            .sent()
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::SignalOffer { .. }))
            .collect();
        assert_eq!(offers.len(), 2);
        assert_eq!(ctl.remotes().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_link_creation_is_a_no_op() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let a = ConnectionId::new();
        for _ in 0..2 {
            ctl.handle_server_event(ServerEvent::ExistingRoomPeers {
                room_name: "lobby".to_string(),
                handles: vec![a],
            })
            .await
            .unwrap();
        }

        // One link, one offer, despite the repeated notification.
        assert_eq!(ctl.remotes(), vec![a]);
        assert_eq!(peers.ops(), vec![format!("offer:{a}")]);
    }

    #[tokio::test]
    async fn test_responder_answers_offer_and_flushes_early_candidates() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let joiner = ConnectionId::new();
        ctl.handle_server_event(ServerEvent::RoomPeerJoined {
            room_name: "lobby".to_string(),
            handle: joiner,
        })
        .await
        .unwrap();

        // Candidates race ahead of the offer: both must be buffered.
        for seq in [1, 2] {
            ctl.handle_server_event(ServerEvent::SignalIce {
                from_handle: joiner,
                payload: json!({"seq": seq}),
            })
            .await
            .unwrap();
        }
        assert!(peers.ops().iter().all(|op| !op.starts_with("candidate")));

        ctl.handle_server_event(ServerEvent::SignalOffer {
            from_handle: joiner,
            payload: json!({"sdp": "v=0"}),
        })
        .await
        .unwrap();

        assert_eq!(
            peers.ops(),
            vec![
                format!("answer:{joiner}"),
                format!("candidate:{joiner}:1"),
                format!("candidate:{joiner}:2"),
            ]
        );
        assert!(sink
            .sent()
            .iter()
            .any(|e| matches!(e, ClientEvent::SignalAnswer { to_handle, .. } if *to_handle == joiner)));
    }

    #[tokio::test]
    async fn test_late_candidates_skip_the_buffer() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let joiner = ConnectionId::new();
        ctl.handle_server_event(ServerEvent::SignalOffer {
            from_handle: joiner,
            payload: json!({"sdp": "v=0"}),
        })
        .await
        .unwrap();

        ctl.handle_server_event(ServerEvent::SignalIce {
            from_handle: joiner,
            payload: json!({"seq": 9}),
        })
        .await
        .unwrap();

        assert_eq!(
            peers.ops(),
            vec![format!("answer:{joiner}"), format!("candidate:{joiner}:9")]
        );
    }

    #[tokio::test]
    async fn test_caller_flow_offer_after_accept_then_answer_applied() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.place_call(UserId::from("bob"), CallKind::Video).unwrap();
        assert!(matches!(ctl.engagement(), Engagement::OutgoingRing { .. }));

        let (session, counterpart) = (SessionId::new(), ConnectionId::new());
        ctl.handle_server_event(ServerEvent::CallAccepted {
            session_id: session,
            counterpart_handle: counterpart,
        })
        .await
        .unwrap();

        assert_eq!(
            *ctl.engagement(),
            Engagement::InCall {
                session,
                counterpart
            }
        );
        assert_eq!(peers.ops(), vec![format!("offer:{counterpart}")]);

        // Candidate before the answer is buffered; flushed once applied.
        ctl.handle_server_event(ServerEvent::SignalIce {
            from_handle: counterpart,
            payload: json!({"seq": 1}),
        })
        .await
        .unwrap();
        ctl.handle_server_event(ServerEvent::SignalAnswer {
            from_handle: counterpart,
            payload: json!({"sdp": "answer"}),
        })
        .await
        .unwrap();

        assert_eq!(
            peers.ops(),
            vec![
                format!("offer:{counterpart}"),
                format!("apply-answer:{counterpart}"),
                format!("candidate:{counterpart}:1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_callee_accept_waits_for_offer_then_joins_call() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        let session = SessionId::new();
        ctl.handle_server_event(ServerEvent::CallIncoming {
            session_id: session,
            caller_id: UserId::from("alice"),
            caller_name: "alice".to_string(),
            kind: CallKind::Audio,
        })
        .await
        .unwrap();
        assert!(matches!(ctl.engagement(), Engagement::IncomingRing { .. }));

        ctl.accept_call().unwrap();
        assert_eq!(*ctl.engagement(), Engagement::AwaitingOffer { session });

        let caller_conn = ConnectionId::new();
        ctl.handle_server_event(ServerEvent::SignalOffer {
            from_handle: caller_conn,
            payload: json!({"sdp": "v=0"}),
        })
        .await
        .unwrap();

        assert_eq!(
            *ctl.engagement(),
            Engagement::InCall {
                session,
                counterpart: caller_conn
            }
        );
        assert!(peers.ops().contains(&format!("answer:{caller_conn}")));
    }

    #[tokio::test]
    async fn test_incoming_call_while_engaged_is_declined() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let session = SessionId::new();
        ctl.handle_server_event(ServerEvent::CallIncoming {
            session_id: session,
            caller_id: UserId::from("alice"),
            caller_name: "alice".to_string(),
            kind: CallKind::Audio,
        })
        .await
        .unwrap();

        assert!(matches!(ctl.engagement(), Engagement::Room { .. }));
        assert!(sink
            .sent()
            .iter()
            .any(|e| matches!(e, ClientEvent::CallReject { session_id } if *session_id == session)));
    }

    #[tokio::test]
    async fn test_room_peer_left_tears_down_exactly_once() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let a = ConnectionId::new();
        ctl.handle_server_event(ServerEvent::ExistingRoomPeers {
            room_name: "lobby".to_string(),
            handles: vec![a],
        })
        .await
        .unwrap();

        for _ in 0..2 {
            ctl.handle_server_event(ServerEvent::RoomPeerLeft {
                room_name: "lobby".to_string(),
                handle: a,
            })
            .await
            .unwrap();
        }

        let closes: Vec<_> = peers
            .ops()
            .into_iter()
            .filter(|op| op == &format!("close:{a}"))
            .collect();
        assert_eq!(closes.len(), 1);
        assert!(ctl.remotes().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_restarts_once_then_tears_down() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.join_room("lobby").unwrap();
        let a = ConnectionId::new();
        ctl.handle_server_event(ServerEvent::ExistingRoomPeers {
            room_name: "lobby".to_string(),
            handles: vec![a],
        })
        .await
        .unwrap();

        // First failure: in-place restart, link survives.
        ctl.on_transport_failed(a).await.unwrap();
        assert!(peers.ops().contains(&format!("restart:{a}")));
        assert_eq!(ctl.remotes(), vec![a]);
        assert!(sink
            .sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::SignalOffer { to_handle, .. } if *to_handle == a))
            .count() == 2);

        // Second failure: the link is destroyed.
        ctl.on_transport_failed(a).await.unwrap();
        assert!(peers.ops().contains(&format!("close:{a}")));
        assert!(ctl.remotes().is_empty());
    }

    #[tokio::test]
    async fn test_hang_up_releases_media_and_closes_links() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.place_call(UserId::from("bob"), CallKind::Audio).unwrap();
        let (session, counterpart) = (SessionId::new(), ConnectionId::new());
        ctl.handle_server_event(ServerEvent::CallAccepted {
            session_id: session,
            counterpart_handle: counterpart,
        })
        .await
        .unwrap();

        ctl.hang_up().unwrap();

        assert_eq!(*ctl.engagement(), Engagement::Idle);
        assert!(ctl.remotes().is_empty());
        assert_eq!(media.released_count(), 1);
        assert!(sink
            .sent()
            .iter()
            .any(|e| matches!(e, ClientEvent::CallEnd { session_id } if *session_id == session)));
    }

    #[tokio::test]
    async fn test_remote_rejection_releases_media() {
        let (media, peers, sink) = (MockMedia::new(), MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.place_call(UserId::from("bob"), CallKind::Video).unwrap();
        // Let the spawned acquisition finish before the rejection arrives.
        tokio::task::yield_now().await;

        ctl.handle_server_event(ServerEvent::CallRejected {
            session_id: SessionId::new(),
            counterpart_handle: None,
        })
        .await
        .unwrap();

        tokio::task::yield_now().await;
        assert_eq!(*ctl.engagement(), Engagement::Idle);
        assert_eq!(media.released_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_ring_still_releases_pending_acquisition() {
        let media = MockMedia::with_delay(Duration::from_millis(500));
        let (peers, sink) = (MockPeers::new(), MockSink::new());
        let mut ctl = controller(&media, &peers, &sink);

        ctl.place_call(UserId::from("bob"), CallKind::Audio).unwrap();
        // Cancel while the permission prompt is still pending.
        ctl.cancel_ring().unwrap();
        assert_eq!(media.released_count(), 0);

        // Acquisition completes later; the watcher must release the tracks.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(media.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(media.released_count(), 1);
    }
}
