//! Call session state machines.
//!
//! One [`CallSession`] per call attempt, keyed by [`SessionId`]. This table
//! is the sole authority over status transitions:
//!
//! ```text
//! ringing -> accepted -> ended
//!         -> rejected
//!         -> timed-out
//!         -> ended          (caller disconnect while ringing)
//! ```
//!
//! Terminal sessions are kept as tombstones so a late transition attempt
//! fails with `AlreadyTerminal` rather than `SessionNotFound`; tombstones
//! are dropped when a participating connection disconnects.
//!
//! Each ringing session owns a `CancellationToken` for its ring timer. Any
//! transition out of `Ringing` cancels the token, so a stale timeout can
//! never fire into a later state.

use crate::errors::CoordinatorError;
use signal_protocol::{CallKind, CallStatus, ConnectionId, SessionId, UserId};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// One call attempt between exactly two users.
#[derive(Debug)]
pub struct CallSession {
    pub id: SessionId,
    pub caller: UserId,
    pub callee: UserId,
    pub kind: CallKind,
    pub status: CallStatus,
    /// Connection that initiated the call.
    pub initiator: ConnectionId,
    /// Callee connection, bound once the callee responds.
    pub counterpart: Option<ConnectionId>,
    /// Cancels the pending ring timer; cancelled on any transition out of
    /// `Ringing`.
    ring_cancel: CancellationToken,
}

/// Who to notify when a session is torn down by a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownNotify {
    /// The surviving bound party of an accepted call.
    Counterpart(ConnectionId),
    /// Every connection of the callee still ringing for this session.
    CalleeConnections(UserId),
}

/// A session ended by disconnect cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornDownCall {
    pub session_id: SessionId,
    pub notify: TeardownNotify,
}

/// Successful `ringing -> accepted` transition.
#[derive(Debug)]
pub struct AcceptedCall {
    pub initiator: ConnectionId,
    pub callee: UserId,
}

/// Successful `ringing -> rejected` transition.
#[derive(Debug)]
pub struct RejectedCall {
    pub initiator: ConnectionId,
    pub callee: UserId,
}

/// Successful `ringing -> timed-out` transition.
#[derive(Debug)]
pub struct TimedOutCall {
    pub initiator: ConnectionId,
    pub callee: UserId,
}

/// Successful `accepted -> ended` transition.
#[derive(Debug)]
pub struct EndedCall {
    /// The party other than the one that requested the end.
    pub counterpart: ConnectionId,
}

/// Table of call sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct CallTable {
    sessions: HashMap<SessionId, CallSession>,
}

impl CallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new ringing session.
    ///
    /// Returns the session id and the ring-timer cancellation token. The
    /// caller is responsible for checking the callee is online first.
    pub fn insert_ringing(
        &mut self,
        caller: UserId,
        callee: UserId,
        kind: CallKind,
        initiator: ConnectionId,
    ) -> (SessionId, CancellationToken) {
        let id = SessionId::new();
        let ring_cancel = CancellationToken::new();
        self.sessions.insert(
            id,
            CallSession {
                id,
                caller,
                callee,
                kind,
                status: CallStatus::Ringing,
                initiator,
                counterpart: None,
                ring_cancel: ring_cancel.clone(),
            },
        );
        (id, ring_cancel)
    }

    /// `ringing -> accepted`, binding the accepter as counterpart.
    ///
    /// Only a connection of the registered callee may accept, and only while
    /// the session is still ringing.
    pub fn accept(
        &mut self,
        id: SessionId,
        accepter: ConnectionId,
        accepter_user: &UserId,
    ) -> Result<AcceptedCall, CoordinatorError> {
        let session = self.ringing_session(id, accepter_user)?;

        session.status = CallStatus::Accepted;
        session.counterpart = Some(accepter);
        session.ring_cancel.cancel();

        Ok(AcceptedCall {
            initiator: session.initiator,
            callee: session.callee.clone(),
        })
    }

    /// `ringing -> rejected`.
    pub fn reject(
        &mut self,
        id: SessionId,
        rejecter_user: &UserId,
    ) -> Result<RejectedCall, CoordinatorError> {
        let session = self.ringing_session(id, rejecter_user)?;

        session.status = CallStatus::Rejected;
        session.ring_cancel.cancel();

        Ok(RejectedCall {
            initiator: session.initiator,
            callee: session.callee.clone(),
        })
    }

    /// `ringing -> timed-out`.
    ///
    /// Idempotent against a racing accept: if the session already left
    /// `Ringing`, the transition fails and the caller drops it silently.
    pub fn timeout(&mut self, id: SessionId) -> Result<TimedOutCall, CoordinatorError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoordinatorError::SessionNotFound(id))?;

        if session.status.is_terminal() {
            return Err(CoordinatorError::AlreadyTerminal(id));
        }
        if session.status != CallStatus::Ringing {
            return Err(CoordinatorError::InvalidTransition(format!(
                "timeout for session {id} in status {:?}",
                session.status
            )));
        }

        session.status = CallStatus::TimedOut;
        session.ring_cancel.cancel();

        Ok(TimedOutCall {
            initiator: session.initiator,
            callee: session.callee.clone(),
        })
    }

    /// `accepted -> ended`, requested by either bound party.
    pub fn end(
        &mut self,
        id: SessionId,
        requester: ConnectionId,
    ) -> Result<EndedCall, CoordinatorError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoordinatorError::SessionNotFound(id))?;

        if session.status.is_terminal() {
            return Err(CoordinatorError::AlreadyTerminal(id));
        }
        if session.status != CallStatus::Accepted {
            return Err(CoordinatorError::InvalidTransition(format!(
                "end for session {id} in status {:?}",
                session.status
            )));
        }

        let counterpart = match session.counterpart {
            Some(c) if c == requester => session.initiator,
            Some(c) if session.initiator == requester => c,
            _ => {
                return Err(CoordinatorError::InvalidTransition(format!(
                    "end for session {id} from non-participant connection"
                )));
            }
        };

        session.status = CallStatus::Ended;
        Ok(EndedCall { counterpart })
    }

    /// End every session the disconnecting handle participates in and drop
    /// its tombstones.
    ///
    /// Returns the teardown notifications the coordinator must deliver.
    /// Ringing sessions where the handle belongs to the *callee* are left
    /// alone: another of the callee's connections may still accept, and the
    /// ring timeout self-heals the rest.
    pub fn remove_for_disconnect(&mut self, handle: ConnectionId) -> Vec<TornDownCall> {
        let mut torn_down = Vec::new();
        let mut remove = Vec::new();

        for session in self.sessions.values_mut() {
            let participates =
                session.initiator == handle || session.counterpart == Some(handle);
            if !participates {
                continue;
            }

            match session.status {
                CallStatus::Accepted => {
                    let other = if session.initiator == handle {
                        session.counterpart
                    } else {
                        Some(session.initiator)
                    };
                    session.status = CallStatus::Ended;
                    if let Some(other) = other {
                        torn_down.push(TornDownCall {
                            session_id: session.id,
                            notify: TeardownNotify::Counterpart(other),
                        });
                    }
                }
                CallStatus::Ringing => {
                    // Caller vanished mid-ring: stop the callee's ring.
                    session.status = CallStatus::Ended;
                    session.ring_cancel.cancel();
                    torn_down.push(TornDownCall {
                        session_id: session.id,
                        notify: TeardownNotify::CalleeConnections(session.callee.clone()),
                    });
                }
                _ => {}
            }

            remove.push(session.id);
        }

        for id in remove {
            self.sessions.remove(&id);
        }
        torn_down
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&CallSession> {
        self.sessions.get(&id)
    }

    /// Number of non-terminal sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    /// Shared guard for the accept/reject paths: the session must exist, be
    /// ringing, and the acting user must be the registered callee.
    fn ringing_session(
        &mut self,
        id: SessionId,
        acting_user: &UserId,
    ) -> Result<&mut CallSession, CoordinatorError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoordinatorError::SessionNotFound(id))?;

        if session.status.is_terminal() {
            return Err(CoordinatorError::AlreadyTerminal(id));
        }
        if session.status != CallStatus::Ringing {
            return Err(CoordinatorError::InvalidTransition(format!(
                "response for session {id} in status {:?}",
                session.status
            )));
        }
        if &session.callee != acting_user {
            return Err(CoordinatorError::InvalidTransition(format!(
                "response for session {id} from a non-callee connection"
            )));
        }
        Ok(session)
    }
}
