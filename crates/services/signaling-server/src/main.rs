//! Signaling server binary entry point
//!
//! Starts a mediasoup worker and the WebSocket signaling gateway in front
//! of it.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:3000, opus only)
//! cargo run -p sfu-signaling-server
//!
//! # From a config file, overriding the public address
//! cargo run -p sfu-signaling-server -- \
//!   --config ./signaling.toml \
//!   --announced-ip 203.0.113.7
//! ```

use clap::Parser;
use sfu_signaling::{
    EngineEvent, Error, MediasoupEngine, ServerConfig, SessionController, SignalingServer,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC media routing signaling server
///
/// Accepts JSON-RPC 2.0 over WebSocket and negotiates transports,
/// producers and consumers with the media engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SIGNALING_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for WebSocket connections
    #[arg(long, env = "SIGNALING_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Listen port for WebSocket connections
    #[arg(short, long, env = "SIGNALING_PORT")]
    port: Option<u16>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, env = "SIGNALING_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Lowest media port
    #[arg(long, env = "SIGNALING_RTC_MIN_PORT")]
    rtc_min_port: Option<u16>,

    /// Highest media port
    #[arg(long, env = "SIGNALING_RTC_MAX_PORT")]
    rtc_max_port: Option<u16>,

    /// Public IP advertised in ICE candidates
    #[arg(long, env = "SIGNALING_ANNOUNCED_IP")]
    announced_ip: Option<String>,
}

impl Args {
    /// File config (or defaults) with command-line overrides applied
    fn into_config(self) -> Result<ServerConfig, Error> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(listen_address) = self.listen_address {
            config.listen_address = listen_address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(min) = self.rtc_min_port {
            config.worker.rtc_min_port = min;
        }
        if let Some(max) = self.rtc_max_port {
            config.worker.rtc_max_port = max;
        }
        if let Some(announced_ip) = self.announced_ip {
            for listen_ip in &mut config.webrtc_transport.listen_ips {
                listen_ip.announced_ip = Some(announced_ip.clone());
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handler before anything else
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(3));
            eprintln!("Graceful shutdown timed out (3s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = args.into_config()?;
    let addr = config.socket_addr()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        max_sessions = config.max_sessions,
        rtc_ports = ?(config.worker.rtc_min_port, config.worker.rtc_max_port),
        "Signaling server starting"
    );

    let engine = Arc::new(MediasoupEngine::new(&config.worker).await?);
    let controller = Arc::new(SessionController::new(engine, &config));
    controller.start().await?;

    // A dead media worker takes every transport with it: exit and let the
    // supervisor restart us
    let engine_events = controller.subscribe_engine();
    tokio::spawn(exit_on_engine_failure(Arc::clone(&controller), engine_events));

    let handle = SignalingServer::new(addr, Arc::clone(&controller))
        .start()
        .await?;
    info!("Signaling server listening on ws://{}", handle.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, stopping signaling server...");
    handle.shutdown().await;
    info!("Signaling server shut down gracefully");

    Ok(())
}

/// Exit the process once the engine event loop fails
async fn exit_on_engine_failure(
    controller: Arc<SessionController>,
    events: broadcast::Receiver<EngineEvent>,
) {
    if let Err(e) = controller.run_engine_events(events).await {
        error!("Media engine failed: {}", e);
        tokio::time::sleep(Duration::from_secs(2)).await;
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
