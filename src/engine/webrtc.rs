//! Production negotiation engine over the `webrtc` crate
//!
//! Each session wraps one `RTCPeerConnection`. Remote tracks received on a
//! producer session are wrapped in `TrackLocalStaticRTP` outputs and pumped
//! by a spawned forward loop; consumer sessions attach those outputs, so one
//! producer fans out to any number of consumers without re-encoding.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{EngineSession, NegotiationEngine, TrackCallback};
use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};
use crate::signaling::IceCandidate;

/// Negotiation engine backed by `webrtc`
pub struct WebRtcEngine {
    config: WebRtcConfig,
}

impl WebRtcEngine {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let mut ice_servers = vec![];

        for stun_url in &self.config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    type Session = WebRtcSession;

    async fn create_session(&self) -> Result<Arc<WebRtcSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::engine(format!("failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::engine(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| AppError::engine(format!("failed to create peer connection: {}", e)))?;

        let session = Arc::new(WebRtcSession {
            pc: Arc::new(pc),
            gathering_timeout: Duration::from_millis(self.config.gathering_timeout_ms),
            tracks: Mutex::new(Vec::new()),
            attached: Mutex::new(HashSet::new()),
            first_track: Mutex::new(None),
        });
        session.install_handlers();

        Ok(session)
    }
}

/// One forwarded media track: the remote track's RTP republished through a
/// local track that any number of consumer connections can carry.
#[derive(Clone)]
struct ForwardTrack {
    id: String,
    local: Arc<TrackLocalStaticRTP>,
}

/// One `RTCPeerConnection` wrapped as an engine session
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    gathering_timeout: Duration,
    /// Accumulated stream, one entry per remote track received
    tracks: Mutex<Vec<ForwardTrack>>,
    /// Ids of producer tracks already attached to this session
    attached: Mutex<HashSet<String>>,
    first_track: Mutex<Option<TrackCallback>>,
}

impl WebRtcSession {
    fn install_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(session) = weak.upgrade() {
                    session.accept_remote_track(track).await;
                }
            })
        }));

        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!("Peer connection state: {}", state);
                Box::pin(async {})
            }));
    }

    async fn accept_remote_track(&self, remote: Arc<TrackRemote>) {
        let id = remote.id();
        info!(
            "Track received: id={}, kind={}, ssrc={}",
            id,
            remote.kind(),
            remote.ssrc()
        );

        let local = Arc::new(TrackLocalStaticRTP::new(
            remote.codec().capability.clone(),
            id.clone(),
            remote.stream_id(),
        ));
        self.tracks.lock().push(ForwardTrack {
            id,
            local: local.clone(),
        });

        // First live track fires the registered callback, exactly once
        let callback = self.first_track.lock().take();
        if let Some(callback) = callback {
            callback().await;
        }

        // Pump RTP from the remote track into the shared local track until
        // the remote side stops
        tokio::spawn(async move {
            loop {
                match remote.read_rtp().await {
                    Ok((packet, _)) => {
                        if let Err(e) = local.write_rtp(&packet).await {
                            debug!("RTP write ended: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("RTP read ended: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl EngineSession for WebRtcSession {
    async fn negotiate_answer(&self, offer_sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| AppError::engine(format!("invalid offer: {}", e)))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| AppError::engine(format!("set_remote_description failed: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::engine(format!("create_answer failed: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::engine(format!("set_local_description failed: {}", e)))?;

        // Bounded wait so the answer carries the gathered candidates; the
        // client can still trickle more on top.
        if tokio::time::timeout(self.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            debug!("ICE gathering still incomplete after {:?}", self.gathering_timeout);
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::engine("local description unavailable"))?;
        Ok(local.sdp)
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        if self.pc.remote_description().await.is_none() {
            debug!("Dropping ICE candidate, remote description not yet set");
            return Ok(());
        }

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::engine(format!("add_ice_candidate failed: {}", e)))
    }

    fn on_first_track(&self, callback: TrackCallback) {
        *self.first_track.lock() = Some(callback);
    }

    async fn forward_from(&self, producer: &Self) -> Result<usize> {
        let tracks: Vec<ForwardTrack> = producer.tracks.lock().clone();
        let mut added = 0;

        for track in tracks {
            if self.attached.lock().contains(&track.id) {
                continue;
            }

            let sender = self
                .pc
                .add_track(track.local.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| AppError::engine(format!("add_track failed: {}", e)))?;
            self.attached.lock().insert(track.id.clone());
            added += 1;

            // Drain RTCP so the interceptors keep processing feedback
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        Ok(added)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}
