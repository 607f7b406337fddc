//! Protocol state machine
//!
//! One inbound frame is dispatched per call; the returned frames are the
//! replies for the sender, while room-wide effects go through the notifier.
//! Handlers suspend only inside engine calls, so after every await the
//! peer/session references are re-fetched from the registry by id — a peer
//! may have disconnected while the handler was suspended, and the resolved
//! engine result is then discarded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::message::{decode_frame, ClientFrame, DecodedFrame, IceCandidate, ServerFrame};
use crate::engine::{EngineSession, NegotiationEngine};
use crate::error::{AppError, Result};
use crate::events::{Notifier, RoomEvent};
use crate::registry::{PeerId, PeerRegistry};

/// Signaling router: receives one message per inbound frame, dispatches by
/// kind, consults the registry, drives engine sessions and fans out events.
pub struct SignalingRouter<E: NegotiationEngine> {
    registry: Arc<PeerRegistry<E::Session>>,
    engine: Arc<E>,
    notifier: Arc<Notifier>,
}

impl<E: NegotiationEngine> SignalingRouter<E> {
    pub fn new(
        registry: Arc<PeerRegistry<E::Session>>,
        engine: Arc<E>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            registry,
            engine,
            notifier,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry<E::Session>> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register a newly accepted transport and return its assigned id.
    pub fn register_peer(&self) -> PeerId {
        let id = self.registry.register();
        info!("New client connected: {}", id);
        id
    }

    /// Handle one inbound text frame from `sender`.
    ///
    /// Returns the reply frames to write back to the sender. Failures never
    /// propagate: request kinds reply with an error frame, relay kinds are
    /// absorbed with a log line, and nothing here can take down the
    /// connection handler.
    pub async fn handle_frame(&self, sender: PeerId, text: &str) -> Vec<ServerFrame> {
        let decoded = match decode_frame(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Undecodable frame from {}: {}", sender, e);
                return vec![ServerFrame::error(&e)];
            }
        };

        match decoded {
            DecodedFrame::Request(frame) => self.dispatch(sender, frame).await,
            DecodedFrame::Legacy { kind } => {
                // Compatibility hazard, preserved deliberately: any frame
                // with an unknown tag is relayed to the whole room.
                warn!("Relaying frame with unrecognized type '{}' from {}", kind, sender);
                self.notifier.broadcast_raw(text);
                vec![]
            }
        }
    }

    async fn dispatch(&self, sender: PeerId, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Connect { username, sdp, .. } => {
                match self.handle_connect(sender, username, &sdp).await {
                    Ok(reply) => vec![reply],
                    Err(e) => {
                        warn!("Publish handshake from {} failed: {}", sender, e);
                        vec![ServerFrame::error(&e)]
                    }
                }
            }
            ClientFrame::GetPeers { .. } => vec![ServerFrame::Peers {
                peers: self.registry.peers_except(sender),
            }],
            ClientFrame::Ice { ice, .. } => {
                self.relay_producer_ice(sender, &ice).await;
                vec![]
            }
            ClientFrame::Subscribe {
                consumer_id,
                producer_id,
                sdp,
            } => match self.handle_subscribe(consumer_id, producer_id, &sdp).await {
                Ok(reply) => vec![reply],
                Err(e) => {
                    warn!(
                        "Subscribe {} -> {} failed: {}",
                        consumer_id, producer_id, e
                    );
                    vec![ServerFrame::error(&e)]
                }
            },
            ClientFrame::ProducerIce {
                consumer_id,
                producer_id,
                ice,
            }
            | ClientFrame::ConsumerIce {
                consumer_id,
                producer_id,
                ice,
            } => {
                self.relay_consumer_ice(consumer_id, producer_id, &ice).await;
                vec![]
            }
        }
    }

    /// Publish handshake: create the peer's producer session, negotiate the
    /// answer and store the session. At most one per connection.
    async fn handle_connect(
        &self,
        sender: PeerId,
        username: String,
        offer_sdp: &str,
    ) -> Result<ServerFrame> {
        // Fail fast before any engine work; the authoritative check runs
        // again at attach time, after the suspension point.
        if !self.registry.contains(sender) {
            return Err(AppError::not_found(format!("peer {}", sender)));
        }
        if self.registry.producer_session(sender).is_some() {
            return Err(AppError::AlreadyPublishing(sender.to_string()));
        }

        self.registry.set_username(sender, username)?;

        let session = self.engine.create_session().await?;

        // First live track announces the producer room-wide. The peer is
        // re-fetched at fire time; if it disconnected in the meantime the
        // broadcast is dropped.
        {
            let registry = self.registry.clone();
            let notifier = self.notifier.clone();
            session.on_first_track(Box::new(move || {
                let registry = registry.clone();
                let notifier = notifier.clone();
                Box::pin(async move {
                    match registry.username(sender) {
                        Ok(username) => notifier.broadcast(&RoomEvent::NewProducer {
                            id: sender,
                            username: username.unwrap_or_default(),
                        }),
                        Err(_) => {
                            debug!("First track for removed peer {}, dropping broadcast", sender)
                        }
                    }
                })
            }));
        }

        let answer = match session.negotiate_answer(offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        // The peer may have disconnected while we negotiated; attach is the
        // authoritative check and the orphan session is discarded on failure.
        match self.registry.attach_producer(sender, session.clone()) {
            Ok(()) => {
                info!("Producer session attached for {}", sender);
                Ok(ServerFrame::Answer { sdp: answer })
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Create (or idempotently extend) the consumer session pulling
    /// `producer_id`'s current tracks for `consumer_id`.
    async fn handle_subscribe(
        &self,
        consumer_id: PeerId,
        producer_id: PeerId,
        offer_sdp: &str,
    ) -> Result<ServerFrame> {
        if !self.registry.contains(consumer_id) {
            return Err(AppError::not_found(format!("consumer {}", consumer_id)));
        }
        let producer_session = self
            .registry
            .producer_session(producer_id)
            .ok_or_else(|| {
                AppError::not_found(format!("producer {} has no active session", producer_id))
            })?;

        // Existing pair: attach only tracks not already present and re-send
        // the stored answer; never a second session.
        if let Some(existing) = self.registry.consumer_session(consumer_id, producer_id) {
            let added = existing.forward_from(&producer_session).await?;
            debug!(
                "Subscribe {} -> {} reused existing session ({} tracks added)",
                consumer_id, producer_id, added
            );
            let sdp = existing.local_description().await.ok_or_else(|| {
                AppError::engine("consumer session has no local description")
            })?;
            return Ok(self.subscribed_frame(sdp, producer_id)?);
        }

        let session = self.engine.create_session().await?;

        // First inbound track on the consumer side flips Pending -> Active
        {
            let registry = self.registry.clone();
            session.on_first_track(Box::new(move || {
                let registry = registry.clone();
                Box::pin(async move {
                    registry.mark_consumer_active(consumer_id, producer_id);
                })
            }));
        }

        // Producer tracks must be on the connection before the answer is
        // built, or the answer would not describe them.
        if let Err(e) = session.forward_from(&producer_session).await {
            session.close().await;
            return Err(e);
        }
        let answer = match session.negotiate_answer(offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        // Re-validate both endpoints after the suspension point.
        if !self.registry.contains(producer_id) {
            session.close().await;
            return Err(AppError::not_found(format!("producer {}", producer_id)));
        }
        let stored = match self
            .registry
            .add_consumer(consumer_id, producer_id, session.clone())
        {
            Ok(stored) => stored,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };
        if !Arc::ptr_eq(&stored, &session) {
            // A concurrent subscribe for the same pair won the insertion
            // race; discard ours and answer from the surviving session.
            session.close().await;
            let sdp = stored.local_description().await.ok_or_else(|| {
                AppError::engine("consumer session has no local description")
            })?;
            return Ok(self.subscribed_frame(sdp, producer_id)?);
        }

        info!("Consumer session created: {} -> {}", consumer_id, producer_id);
        Ok(self.subscribed_frame(answer, producer_id)?)
    }

    fn subscribed_frame(&self, sdp: String, producer_id: PeerId) -> Result<ServerFrame> {
        let producer_username = self.registry.username(producer_id)?;
        Ok(ServerFrame::Subscribed {
            sdp,
            producer_id,
            producer_username,
        })
    }

    /// Relay a trickled candidate into the sender's own producer session.
    /// A missing session is the normal trickle race, not an error.
    async fn relay_producer_ice(&self, sender: PeerId, ice: &IceCandidate) {
        let Some(session) = self.registry.producer_session(sender) else {
            debug!("ICE from {} before its producer session exists, dropped", sender);
            return;
        };
        if let Err(e) = session.add_ice_candidate(ice).await {
            warn!("ICE relay into producer session of {} failed: {}", sender, e);
        }
    }

    /// Relay a trickled candidate into the consumer session for a pair.
    async fn relay_consumer_ice(&self, consumer_id: PeerId, producer_id: PeerId, ice: &IceCandidate) {
        let Some(session) = self.registry.consumer_session(consumer_id, producer_id) else {
            debug!(
                "ICE for consumer session {} -> {} before it exists, dropped",
                consumer_id, producer_id
            );
            return;
        };
        if let Err(e) = session.add_ice_candidate(ice).await {
            warn!(
                "ICE relay into consumer session {} -> {} failed: {}",
                consumer_id, producer_id, e
            );
        }
    }

    /// Transport close sequence: cascade removal, engine teardown, one
    /// departure broadcast. Safe to call more than once; only the first
    /// call after registration does anything.
    pub async fn handle_disconnect(&self, id: PeerId) {
        let Some(removed) = self.registry.remove(id) else {
            return;
        };

        if let Some(producer) = removed.producer {
            producer.close().await;
        }
        for consumer in removed.consumers {
            debug!(
                "Tearing down consumer session {} -> {}",
                consumer.consumer_id, consumer.producer_id
            );
            consumer.handle.close().await;
        }

        info!("Peer disconnected: {}", id);
        self.notifier.broadcast(&RoomEvent::UserLeft { id });
    }

    /// Close and drop consumer sessions still pending after `ttl`.
    /// Returns how many were removed.
    pub async fn sweep_pending(&self, ttl: Duration) -> usize {
        let expired = self.registry.expired_pending(ttl);
        let count = expired.len();
        for session in expired {
            warn!(
                "Consumer session {} -> {} pending past {:?}, closing",
                session.consumer_id, session.producer_id, ttl
            );
            session.handle.close().await;
        }
        count
    }
}
