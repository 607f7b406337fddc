use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callhub::config::AppConfig;
use callhub::engine::WebRtcEngine;
use callhub::state::AppState;
use callhub::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// callhub command line arguments
#[derive(Parser, Debug)]
#[command(name = "callhub")]
#[command(version, about = "Selective-forwarding signaling server for multi-party video calls", long_about = None)]
struct CliArgs {
    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Path to JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to TLS certificate file (PEM)
    #[arg(long, value_name = "FILE", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM)
    #[arg(long, value_name = "FILE", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// STUN server URL (repeatable, overrides config file)
    #[arg(long, value_name = "URL")]
    stun_server: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Install default crypto provider (required by rustls 0.23+)
    CryptoProvider::install_default(ring::default_provider())
        .expect("Failed to install rustls crypto provider");

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // CLI arguments override the config file
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.tls_cert.is_some() {
        config.server.tls_cert = args.tls_cert;
        config.server.tls_key = args.tls_key;
    }
    if !args.stun_server.is_empty() {
        config.webrtc.stun_servers = args.stun_server.clone();
    }

    let engine = WebRtcEngine::new(config.webrtc.clone());
    let state = AppState::new(config.clone(), engine);
    state.spawn_pending_sweeper();

    let app = web::create_router(state);

    let ip: IpAddr = config
        .server
        .address
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {}", config.server.address, e))?;
    let addr = SocketAddr::new(ip, config.server.port);

    let (scheme, ws_scheme) = if config.server.tls_enabled() {
        ("https", "wss")
    } else {
        ("http", "ws")
    };
    info!("Server started");
    info!("Localhost: {}://localhost:{}", scheme, addr.port());
    if let Some(lan_ip) = local_ip_address() {
        info!("LAN:       {}://{}:{}", scheme, lan_ip, addr.port());
    }
    info!("Sockets:   {}://{}/ws", ws_scheme, addr);

    if let (Some(cert), Some(key)) = (&config.server.tls_cert, &config.server.tls_key) {
        let tls_config = RustlsConfig::from_pem_file(cert, key).await?;
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        axum_server::bind(addr).serve(app.into_make_service()).await?;
    }

    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "callhub=error,tower_http=error",
        LogLevel::Warn => "callhub=warn,tower_http=warn",
        LogLevel::Info => "callhub=info,tower_http=info,webrtc=warn",
        LogLevel::Debug => "callhub=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "callhub=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Best-effort LAN address for the startup banner. Routing lookup only, no
/// packet leaves the host.
fn local_ip_address() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}
