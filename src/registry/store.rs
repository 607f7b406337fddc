use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::peer::{ConsumerSession, ConsumerState, Peer, PeerId, PeerInfo};
use crate::error::{AppError, Result};

/// Everything torn out of the registry when a peer is removed.
///
/// The caller owns the teardown of the returned engine handles and the
/// departure broadcast; the registry itself performs no I/O.
pub struct RemovedPeer<S> {
    pub id: PeerId,
    pub producer: Option<Arc<S>>,
    /// Consumer sessions that referenced the removed peer on either side
    pub consumers: Vec<RemovedConsumer<S>>,
}

/// Key and handle of one removed consumer session
pub struct RemovedConsumer<S> {
    pub consumer_id: PeerId,
    pub producer_id: PeerId,
    pub handle: Arc<S>,
}

/// Membership map shared by all connection handlers.
///
/// Generic over the engine session type so tests can drive it with a mock.
/// The lock is never held across a suspension point; handlers that resume
/// after an await re-fetch entries by id instead of keeping references.
pub struct PeerRegistry<S> {
    peers: RwLock<HashMap<PeerId, Peer<S>>>,
}

impl<S> PeerRegistry<S> {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id and insert an empty peer record. Never fails.
    pub fn register(&self) -> PeerId {
        let id = PeerId::new();
        self.peers.write().insert(id, Peer::new(id));
        id
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Display name of a registered peer; `NotFound` if the id is unknown.
    pub fn username(&self, id: PeerId) -> Result<Option<String>> {
        let peers = self.peers.read();
        let peer = peers
            .get(&id)
            .ok_or_else(|| AppError::not_found(format!("peer {}", id)))?;
        Ok(peer.username.clone())
    }

    /// Idempotent overwrite; `NotFound` if the id is unknown.
    pub fn set_username(&self, id: PeerId, name: impl Into<String>) -> Result<()> {
        let mut peers = self.peers.write();
        let peer = peers
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("peer {}", id)))?;
        peer.username = Some(name.into());
        Ok(())
    }

    /// Attach the peer's producer session, created at most once per
    /// connection. A second attempt fails with `AlreadyPublishing`.
    pub fn attach_producer(&self, id: PeerId, session: Arc<S>) -> Result<()> {
        let mut peers = self.peers.write();
        let peer = peers
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("peer {}", id)))?;
        if peer.producer.is_some() {
            return Err(AppError::AlreadyPublishing(id.to_string()));
        }
        peer.producer = Some(session);
        Ok(())
    }

    pub fn producer_session(&self, id: PeerId) -> Option<Arc<S>> {
        self.peers.read().get(&id)?.producer.clone()
    }

    /// Record a consumer session pulling `producer_id`'s stream.
    ///
    /// Both endpoints must be registered. Returns the session now stored for
    /// the pair: if another handler won the insertion race, the existing
    /// session is returned and the caller's handle is left untouched, so the
    /// caller can detect the loss via handle identity and discard its own.
    pub fn add_consumer(
        &self,
        consumer_id: PeerId,
        producer_id: PeerId,
        session: Arc<S>,
    ) -> Result<Arc<S>> {
        let mut peers = self.peers.write();
        if !peers.contains_key(&producer_id) {
            return Err(AppError::not_found(format!("producer {}", producer_id)));
        }
        let consumer = peers
            .get_mut(&consumer_id)
            .ok_or_else(|| AppError::not_found(format!("consumer {}", consumer_id)))?;
        let entry = consumer
            .consumers
            .entry(producer_id)
            .or_insert_with(|| ConsumerSession::new(producer_id, session));
        Ok(entry.handle.clone())
    }

    pub fn consumer_session(&self, consumer_id: PeerId, producer_id: PeerId) -> Option<Arc<S>> {
        let peers = self.peers.read();
        let session = peers.get(&consumer_id)?.consumers.get(&producer_id)?;
        Some(session.handle.clone())
    }

    /// Flip a consumer session to `Active` on its first inbound track.
    /// Missing peer or pair is a no-op; the session may already be gone.
    pub fn mark_consumer_active(&self, consumer_id: PeerId, producer_id: PeerId) {
        let mut peers = self.peers.write();
        if let Some(peer) = peers.get_mut(&consumer_id) {
            if let Some(session) = peer.consumers.get_mut(&producer_id) {
                session.state = ConsumerState::Active;
            }
        }
    }

    pub fn consumer_state(&self, consumer_id: PeerId, producer_id: PeerId) -> Option<ConsumerState> {
        let peers = self.peers.read();
        Some(peers.get(&consumer_id)?.consumers.get(&producer_id)?.state)
    }

    /// Remove a peer and everything that referenced it.
    ///
    /// Returns `None` when the peer was already removed, so a repeated
    /// disconnect sequence runs at most once. Otherwise returns the peer's
    /// producer handle plus every consumer session on either side.
    pub fn remove(&self, id: PeerId) -> Option<RemovedPeer<S>> {
        let mut peers = self.peers.write();
        let peer = peers.remove(&id)?;

        let mut consumers: Vec<RemovedConsumer<S>> = peer
            .consumers
            .into_iter()
            .map(|(producer_id, session)| RemovedConsumer {
                consumer_id: id,
                producer_id,
                handle: session.handle,
            })
            .collect();

        // Sessions in which the removed peer was the producer side
        for other in peers.values_mut() {
            if let Some(session) = other.consumers.remove(&id) {
                consumers.push(RemovedConsumer {
                    consumer_id: other.id,
                    producer_id: id,
                    handle: session.handle,
                });
            }
        }

        Some(RemovedPeer {
            id,
            producer: peer.producer,
            consumers,
        })
    }

    /// Snapshot of every registered peer except `id`
    pub fn peers_except(&self, id: PeerId) -> Vec<PeerInfo> {
        self.peers
            .read()
            .values()
            .filter(|peer| peer.id != id)
            .map(Peer::info)
            .collect()
    }

    /// Remove and return consumer sessions still pending after `ttl`.
    pub fn expired_pending(&self, ttl: Duration) -> Vec<RemovedConsumer<S>> {
        let mut peers = self.peers.write();
        let mut expired = Vec::new();
        for peer in peers.values_mut() {
            let stale: Vec<PeerId> = peer
                .consumers
                .iter()
                .filter(|(_, s)| s.state == ConsumerState::Pending && s.created_at.elapsed() >= ttl)
                .map(|(producer_id, _)| *producer_id)
                .collect();
            for producer_id in stale {
                if let Some(session) = peer.consumers.remove(&producer_id) {
                    expired.push(RemovedConsumer {
                        consumer_id: peer.id,
                        producer_id,
                        handle: session.handle,
                    });
                }
            }
        }
        expired
    }
}

impl<S> Default for PeerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in engine handle; identity is all the registry cares about.
    #[derive(Debug)]
    struct FakeSession(u32);

    fn session(n: u32) -> Arc<FakeSession> {
        Arc::new(FakeSession(n))
    }

    #[test]
    fn register_and_lookup() {
        let registry: PeerRegistry<FakeSession> = PeerRegistry::new();
        let id = registry.register();

        assert!(registry.contains(id));
        assert_eq!(registry.username(id).unwrap(), None);
        assert!(registry.producer_session(id).is_none());
    }

    #[test]
    fn set_username_overwrites() {
        let registry: PeerRegistry<FakeSession> = PeerRegistry::new();
        let id = registry.register();

        registry.set_username(id, "alice").unwrap();
        registry.set_username(id, "alice2").unwrap();
        assert_eq!(registry.username(id).unwrap().as_deref(), Some("alice2"));

        let unknown = PeerId::new();
        assert!(matches!(
            registry.set_username(unknown, "x"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn attach_producer_guards_double_publish() {
        let registry = PeerRegistry::new();
        let id = registry.register();

        registry.attach_producer(id, session(1)).unwrap();
        let err = registry.attach_producer(id, session(2)).unwrap_err();
        assert!(matches!(err, AppError::AlreadyPublishing(_)));

        // The first session stayed in place
        let held = registry.producer_session(id).unwrap();
        assert_eq!(held.0, 1);
    }

    #[test]
    fn add_consumer_requires_both_endpoints() {
        let registry = PeerRegistry::new();
        let consumer = registry.register();
        let producer = registry.register();
        let ghost = PeerId::new();

        assert!(matches!(
            registry.add_consumer(consumer, ghost, session(1)),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            registry.add_consumer(ghost, producer, session(1)),
            Err(AppError::NotFound(_))
        ));

        registry.add_consumer(consumer, producer, session(1)).unwrap();
        assert!(registry.consumer_session(consumer, producer).is_some());
        assert_eq!(
            registry.consumer_state(consumer, producer),
            Some(ConsumerState::Pending)
        );
    }

    #[test]
    fn add_consumer_keeps_existing_session() {
        let registry = PeerRegistry::new();
        let consumer = registry.register();
        let producer = registry.register();

        let first = session(1);
        let stored = registry
            .add_consumer(consumer, producer, first.clone())
            .unwrap();
        assert!(Arc::ptr_eq(&stored, &first));

        // A second insert for the same pair loses to the existing session
        let second = session(2);
        let stored = registry.add_consumer(consumer, producer, second).unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
    }

    #[test]
    fn remove_cascades_both_sides() {
        let registry = PeerRegistry::new();
        let a = registry.register();
        let b = registry.register();
        let c = registry.register();

        registry.attach_producer(a, session(10)).unwrap();
        // B pulls from A, A pulls from C
        registry.add_consumer(b, a, session(20)).unwrap();
        registry.add_consumer(a, c, session(30)).unwrap();

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(removed.producer.is_some());
        assert_eq!(removed.consumers.len(), 2);

        // Nothing referencing A survives
        assert!(!registry.contains(a));
        assert!(registry.consumer_session(b, a).is_none());
        assert!(registry.contains(b));
        assert!(registry.contains(c));
    }

    #[test]
    fn remove_runs_once() {
        let registry: PeerRegistry<FakeSession> = PeerRegistry::new();
        let id = registry.register();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        // A stale id is rejected by every operation afterwards
        assert!(matches!(
            registry.set_username(id, "late"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn peers_except_excludes_caller() {
        let registry: PeerRegistry<FakeSession> = PeerRegistry::new();
        let a = registry.register();
        let b = registry.register();
        registry.set_username(b, "bob").unwrap();

        let snapshot = registry.peers_except(a);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, b);
        assert_eq!(snapshot[0].username.as_deref(), Some("bob"));
    }

    #[test]
    fn expired_pending_removes_only_stale() {
        let registry = PeerRegistry::new();
        let consumer = registry.register();
        let p1 = registry.register();
        let p2 = registry.register();

        registry.add_consumer(consumer, p1, session(1)).unwrap();
        registry.add_consumer(consumer, p2, session(2)).unwrap();
        registry.mark_consumer_active(consumer, p2);

        // Zero TTL: every still-pending session counts as expired
        let expired = registry.expired_pending(Duration::from_secs(0));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].producer_id, p1);

        assert!(registry.consumer_session(consumer, p1).is_none());
        assert!(registry.consumer_session(consumer, p2).is_some());
    }
}
