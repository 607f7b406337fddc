//! Application configuration
//!
//! Defaults work out of the box; a JSON config file and CLI flags can
//! override them. No persistent store — the server is stateless across
//! restarts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub server: ServerConfig,
    /// WebRTC negotiation settings
    pub webrtc: WebRtcConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            webrtc: WebRtcConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub address: String,
    /// Listen port
    pub port: u16,
    /// Path to TLS certificate file (PEM); TLS disabled when unset
    pub tls_cert: Option<PathBuf>,
    /// Path to TLS private key file (PEM)
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    /// Whether both TLS paths are configured
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

/// WebRTC negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// ICE candidate gathering timeout (ms) when building an answer
    pub gathering_timeout_ms: u64,
    /// Consumer sessions still pending after this many seconds are torn
    /// down by the sweeper; 0 disables expiry
    pub pending_ttl_secs: u64,
    /// Sweep interval for expired pending sessions (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            gathering_timeout_ms: 5000,
            pending_ttl_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.tls_enabled());
        assert_eq!(
            config.webrtc.stun_servers,
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
        assert!(config.webrtc.pending_ttl_secs > 0);
    }

    #[test]
    fn load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": 9000}}}}"#).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        // Untouched sections fall back to defaults
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.webrtc.gathering_timeout_ms, 5000);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/callhub.json")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
