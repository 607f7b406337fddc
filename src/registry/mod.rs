//! Peer registry — the single source of truth for room membership
//!
//! Tracks every connected peer, its display name, its producer session and
//! the consumer sessions it has opened toward other producers. All side
//! effects are confined to the map; no I/O happens here.

mod peer;
mod store;

pub use peer::{ConsumerSession, ConsumerState, Peer, PeerId, PeerInfo};
pub use store::{PeerRegistry, RemovedConsumer, RemovedPeer};
