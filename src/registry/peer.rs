use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque peer identifier, assigned at connection time and stable for the
/// lifetime of the connection. Serialized as a UUID string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Allocate a fresh unique id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Membership snapshot entry returned by `getPeers`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Absent until the peer completes its publish handshake
    pub username: Option<String>,
}

/// One connected participant
///
/// `username` and `producer` are populated asynchronously as the publish
/// handshake completes. Destruction cascades: removing a peer also removes
/// every consumer session in which it is either endpoint.
pub struct Peer<S> {
    pub id: PeerId,
    pub username: Option<String>,
    /// At most one per connection; a second publish attempt is a protocol
    /// error, not a replacement
    pub producer: Option<Arc<S>>,
    /// Consumer sessions keyed by the remote producer's id
    pub consumers: HashMap<PeerId, ConsumerSession<S>>,
}

impl<S> Peer<S> {
    pub(super) fn new(id: PeerId) -> Self {
        Self {
            id,
            username: None,
            producer: None,
            consumers: HashMap::new(),
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

/// One consumer pulling one producer's stream
pub struct ConsumerSession<S> {
    pub producer_id: PeerId,
    /// Underlying engine session driving this pull
    pub handle: Arc<S>,
    pub state: ConsumerState,
    pub created_at: Instant,
}

impl<S> ConsumerSession<S> {
    pub(super) fn new(producer_id: PeerId, handle: Arc<S>) -> Self {
        Self {
            producer_id,
            handle,
            state: ConsumerState::Pending,
            created_at: Instant::now(),
        }
    }
}

/// Consumer session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Offer answered, awaiting trickle/track completion
    Pending,
    /// First track received
    Active,
}
