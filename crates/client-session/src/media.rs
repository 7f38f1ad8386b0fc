//! Local media capture lifecycle.
//!
//! Capture is the controller's one true suspension point: the permission
//! prompt and device startup can take arbitrarily long, and the user can
//! cancel the call while they are pending. The [`MediaSource`] seam makes
//! acquisition a spawned task, so a cancelled ring can still release the
//! tracks when acquisition eventually completes.

use signal_protocol::CallKind;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Handle to acquired local tracks.
///
/// Opaque to the controller beyond the kind it was acquired for; the
/// [`MediaSource`] implementation owns the real device objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTracks {
    /// What the tracks were acquired for (audio, or audio+video).
    pub kind: CallKind,
    /// Implementation-defined track identifiers.
    pub track_ids: Vec<String>,
}

/// Errors from local media acquisition.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The user denied the capture permission prompt.
    #[error("Media permission denied")]
    PermissionDenied,

    /// No usable capture device.
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Boxed future returned by [`MediaSource::acquire`].
pub type AcquireFuture = Pin<Box<dyn Future<Output = Result<MediaTracks, MediaError>> + Send>>;

/// Provides local capture, implemented over the platform media API.
///
/// `acquire` may suspend indefinitely (permission prompt); `release` must
/// be callable exactly once per acquired [`MediaTracks`] and is synchronous
/// so it can run on every exit path, including drop-like cleanup.
pub trait MediaSource: Send + Sync {
    /// Start capturing local tracks for a call of the given kind.
    fn acquire(&self, kind: CallKind) -> AcquireFuture;

    /// Stop capturing and free the device.
    fn release(&self, tracks: MediaTracks);
}
