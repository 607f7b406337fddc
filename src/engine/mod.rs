//! Negotiation engine seam
//!
//! One engine connection per producer and per consumer-producer pair. The
//! actual WebRTC engine is an external collaborator; the router only depends
//! on the negotiation contract below, so tests drive it with a mock and the
//! production build plugs in [`WebRtcEngine`].

pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::signaling::IceCandidate;

pub use self::webrtc::{WebRtcEngine, WebRtcSession};

/// Callback fired when the first live track lands on a session.
///
/// Fired exactly once per session; later tracks extend the session's
/// accumulated stream without re-firing.
pub type TrackCallback = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Factory for negotiation sessions
#[async_trait]
pub trait NegotiationEngine: Send + Sync + 'static {
    type Session: EngineSession;

    /// Create a fresh session configured with the engine's ICE servers.
    async fn create_session(&self) -> Result<Arc<Self::Session>>;
}

/// One negotiation session (producer or consumer side)
#[async_trait]
pub trait EngineSession: Send + Sync + 'static {
    /// Set the remote offer, then create and apply the local answer.
    ///
    /// This is a suspension point. It is atomic with respect to other
    /// operations on the same handle; operations on other handles interleave
    /// freely, so callers must re-validate registry state afterwards.
    async fn negotiate_answer(&self, offer_sdp: &str) -> Result<String>;

    /// The most recently negotiated local answer, if any.
    async fn local_description(&self) -> Option<String>;

    /// Inject a trickled candidate. Candidates arriving before the remote
    /// description is set are dropped with a log line, not an error.
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Register the first-track callback.
    fn on_first_track(&self, callback: TrackCallback);

    /// Attach every accumulated track of `producer` that this session does
    /// not already carry, compared by track id. Returns how many were added.
    async fn forward_from(&self, producer: &Self) -> Result<usize>;

    /// Tear down the underlying connection.
    async fn close(&self);
}
