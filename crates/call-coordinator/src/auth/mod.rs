//! Connection-establishment identity verification.
//!
//! Token issuance and validation live outside this service: the coordinator
//! only consumes a verified [`Identity`]. The seam is the
//! [`IdentityVerifier`] trait, awaited by the transport layer *before* any
//! registry state exists for the connection, so verification latency never
//! holds shared tables.

use crate::errors::CoordinatorError;
use signal_protocol::{Identity, UserId};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`IdentityVerifier::verify`].
pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Identity, CoordinatorError>> + Send + 'a>>;

/// Verifies the auth token presented in a connection's first frame.
///
/// Implementations may call out to an auth service; the returned future is
/// awaited by the transport layer before the connection is registered.
pub trait IdentityVerifier: Send + Sync {
    /// Verify a raw token, producing the identity to attach to the
    /// connection, or `AuthenticationFailed`.
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a>;
}

/// Development verifier for running the coordinator without an auth service.
///
/// Accepts tokens of the form `user_id:username[:avatar_url]`. Anything
/// else fails verification. Production deployments substitute their own
/// [`IdentityVerifier`] pointed at the real token validator.
#[derive(Debug, Default, Clone)]
pub struct DevTokenVerifier;

impl IdentityVerifier for DevTokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a> {
        Box::pin(async move {
            let mut parts = token.splitn(3, ':');
            let user_id = parts.next().unwrap_or_default();
            let username = parts.next().unwrap_or_default();

            if user_id.is_empty() || username.is_empty() {
                return Err(CoordinatorError::AuthenticationFailed(
                    "dev token must be user_id:username[:avatar_url]".to_string(),
                ));
            }

            Ok(Identity {
                user_id: UserId::from(user_id),
                username: username.to_string(),
                avatar_url: parts.next().map(str::to_string),
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_verifier_accepts_well_formed_token() {
        let verifier = DevTokenVerifier;
        let identity = verifier.verify("user-1:alice").await.unwrap();
        assert_eq!(identity.user_id, UserId::from("user-1"));
        assert_eq!(identity.username, "alice");
        assert!(identity.avatar_url.is_none());
    }

    #[tokio::test]
    async fn test_dev_verifier_parses_avatar_url() {
        let verifier = DevTokenVerifier;
        let identity = verifier
            .verify("user-1:alice:https://cdn.example/a.png")
            .await
            .unwrap();
        assert_eq!(
            identity.avatar_url.as_deref(),
            Some("https://cdn.example/a.png")
        );
    }

    #[tokio::test]
    async fn test_dev_verifier_rejects_malformed_tokens() {
        let verifier = DevTokenVerifier;
        for bad in ["", "user-1", ":alice", "user-1:"] {
            let result = verifier.verify(bad).await;
            assert!(
                matches!(result, Err(CoordinatorError::AuthenticationFailed(_))),
                "token {bad:?} should fail"
            );
        }
    }
}
