use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::engine::NegotiationEngine;
use crate::events::Notifier;
use crate::registry::PeerRegistry;
use crate::signaling::SignalingRouter;

/// Application-wide state shared across connection handlers
///
/// Owns the injected registry/engine/notifier wiring through the router.
/// Constructed once in `main` (or per test fixture) — there is no hidden
/// module-level singleton, so several isolated instances can coexist.
pub struct AppState<E: NegotiationEngine> {
    /// Application configuration
    pub config: AppConfig,
    /// Signaling router driving registry, engine and notifier
    pub router: Arc<SignalingRouter<E>>,
}

impl<E: NegotiationEngine> AppState<E> {
    /// Create new application state around an engine instance
    pub fn new(config: AppConfig, engine: E) -> Arc<Self> {
        let router = Arc::new(SignalingRouter::new(
            Arc::new(PeerRegistry::new()),
            Arc::new(engine),
            Arc::new(Notifier::new()),
        ));
        Arc::new(Self { config, router })
    }

    /// Spawn the periodic sweeper that expires consumer sessions stuck in
    /// the pending state. Disabled when the TTL is configured as zero.
    pub fn spawn_pending_sweeper(self: &Arc<Self>) {
        let ttl_secs = self.config.webrtc.pending_ttl_secs;
        if ttl_secs == 0 {
            debug!("Pending-session expiry disabled");
            return;
        }
        let ttl = Duration::from_secs(ttl_secs);
        let interval = Duration::from_secs(self.config.webrtc.sweep_interval_secs.max(1));

        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh server
            // does not sweep an empty room
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = state.router.sweep_pending(ttl).await;
                if swept > 0 {
                    info!("Swept {} stuck pending consumer sessions", swept);
                }
            }
        });
    }
}
