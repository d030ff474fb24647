//! Camera viewer binary entry point
//!
//! Connects to one camera through the signaling relay, keeps the connection
//! alive with the reconnection supervisor and counts the received RTP packets.
//!
//! # Usage
//!
//! ```bash
//! # Relay given directly
//! cargo run -p streameasy-viewer-cli -- \
//!   --server-url ws://localhost:8080 \
//!   --camera-id front-door
//!
//! # Relay derived from the HTTP API base
//! cargo run -p streameasy-viewer-cli -- \
//!   --api-url https://streameasy.example.com \
//!   --camera-id front-door
//!
//! # Settings from a TOML file, flags win
//! cargo run -p streameasy-viewer-cli -- \
//!   --config viewer.toml \
//!   --max-attempts 10
//! ```

mod packet_counter;

use anyhow::Context;
use clap::Parser;
use packet_counter::PacketCounter;
use std::path::PathBuf;
use std::sync::Arc;
use streameasy_viewer::config::relay_base_from_http;
use streameasy_viewer::{status, ReconnectionSupervisor, SignalingSession, ViewerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// StreamEasy camera viewer
///
/// Headless viewer that negotiates a WebRTC session with a camera through the
/// signaling relay and reconnects with exponential backoff.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay base URL (ws:// or wss://)
    #[arg(long, env = "STREAMEASY_SERVER_URL")]
    server_url: Option<String>,

    /// HTTP API base URL; the relay URL is derived from it when --server-url is not set
    #[arg(long, env = "STREAMEASY_API_URL")]
    api_url: Option<String>,

    /// Camera to view
    #[arg(long, env = "STREAMEASY_CAMERA_ID")]
    camera_id: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Vec<String>,

    /// Maximum reconnection attempts between successful connections
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before the first reconnection attempt
    #[arg(long)]
    initial_delay_ms: Option<u64>,

    /// Upper bound for the reconnection delay
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Disable automatic reconnection
    #[arg(long)]
    no_reconnect: bool,

    /// Seconds to wait for media after connecting (0 disables)
    #[arg(long)]
    negotiation_timeout_secs: Option<u64>,

    /// Send the offer right away and trickle ICE candidates
    #[arg(long)]
    trickle: bool,
}

impl Args {
    /// Overlay the flags on the config file (or the defaults)
    fn into_config(self) -> anyhow::Result<ViewerConfig> {
        let mut config = match &self.config {
            Some(path) => ViewerConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ViewerConfig::default(),
        };

        if let Some(server_url) = self.server_url {
            config.server_url = server_url;
        } else if let Some(api_url) = self.api_url {
            config.server_url = relay_base_from_http(&api_url)?;
        }

        if let Some(camera_id) = self.camera_id {
            config.camera_id = camera_id;
        }
        if !self.stun_servers.is_empty() {
            config.stun_servers = self.stun_servers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.reconnect.max_attempts = max_attempts;
        }
        if let Some(initial_delay_ms) = self.initial_delay_ms {
            config.reconnect.initial_delay_ms = initial_delay_ms;
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            config.reconnect.max_delay_ms = max_delay_ms;
        }
        if self.no_reconnect {
            config.reconnect.enabled = false;
        }
        if let Some(timeout) = self.negotiation_timeout_secs {
            config.negotiation_timeout_secs = timeout;
        }
        if self.trickle {
            config.trickle_ice = true;
        }

        config.validate()?;
        anyhow::ensure!(
            !config.camera_id.is_empty(),
            "a camera id is required (--camera-id or STREAMEASY_CAMERA_ID)"
        );

        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // One session, one supervisor: a single thread is plenty
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    let config = args.into_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        camera_id = %config.camera_id,
        relay_url = %config.relay_url(),
        reconnect = config.reconnect.enabled,
        "Camera viewer starting"
    );

    let counter = Arc::new(PacketCounter::new());
    let session = SignalingSession::webrtc_with_sink(config.clone(), counter.clone());

    let handle = session.clone();
    let supervisor = ReconnectionSupervisor::observe(
        session.subscribe(),
        move || handle.connect(),
        config.reconnect,
    );

    let mut states = session.subscribe();
    let mut reconnect_status = supervisor.subscribe();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    session.connect();

    let mut last_banner: Option<String> = None;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl+C received, shutting down");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!(
                    phase = %state.phase,
                    connected = state.connected,
                    loading = state.loading,
                    "Connection state changed"
                );
            }
            changed = reconnect_status.changed() => {
                if changed.is_err() {
                    break;
                }
                reconnect_status.borrow_and_update();
            }
        }

        let banner = status::banner(&session.state(), Some(&supervisor.status()));
        if banner != last_banner {
            if let Some(text) = &banner {
                eprintln!("[{}] {}", config.camera_id, text);
            }
            last_banner = banner;
        }
    }

    // Supervisor first so the disconnect is not retried
    supervisor.shutdown();
    session.disconnect().await;
    counter.report();

    info!("Camera viewer stopped");
    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
