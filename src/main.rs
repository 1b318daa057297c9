use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshcall::call::CallOrchestrator;
use meshcall::channel::{ChannelOptions, ResilientChannel, StaticCredentials, WsConnector};
use meshcall::config::{AppConfig, ConfigStore};
use meshcall::events::EventBus;
use meshcall::webrtc::{RtcConnectionFactory, StaticMediaDevices, WebRtcConfig};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// meshcall command line arguments
#[derive(Parser, Debug)]
#[command(name = "meshcall")]
#[command(version, about = "Headless participant for mesh WebRTC room calls", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "meshcall.toml")]
    config: PathBuf,

    /// Relay base URL, e.g. https://chat.example.com (overrides config)
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Relay access token (overrides config)
    #[arg(long, value_name = "TOKEN", env = "MESHCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Local identity, usually the account e-mail (overrides config)
    #[arg(short = 'i', long, value_name = "ID")]
    identity: Option<String>,

    /// Room to enter on start (overrides config)
    #[arg(short = 'r', long, value_name = "ROOM")]
    room: Option<i64>,

    /// Start a call in the room, then join it
    #[arg(long)]
    start: bool,

    /// Join the room's call
    #[arg(long)]
    join: bool,

    /// Do not capture camera or microphone
    #[arg(long)]
    view_only: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    // Required by rustls 0.23+ for wss:// relays
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!("Starting meshcall v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::open(&args.config).await?;
    let mut config = (*config_store.get()).clone();
    apply_overrides(&mut config, &args);

    if config.identity.id.trim().is_empty() {
        anyhow::bail!("No identity configured; pass --identity or set identity.id");
    }
    if args.save_config {
        config_store.set(config.clone()).await?;
        tracing::info!("Configuration saved to {}", config_store.path().display());
    }

    tracing::info!("Identity: {}", config.identity.id);
    tracing::info!("Relay: {}", config.relay.url);

    let events = Arc::new(EventBus::new());
    spawn_event_logger(&events);

    let channel = ResilientChannel::spawn(
        Arc::new(WsConnector::new(config.relay.url.clone())),
        Arc::new(StaticCredentials::new(config.relay.token.clone())),
        ChannelOptions::from(&config.relay),
    );
    if config.relay.token.is_none() {
        tracing::warn!("No relay token configured, waiting for one before connecting");
    }

    let factory = Arc::new(RtcConnectionFactory::new(WebRtcConfig::from(
        &config.webrtc,
    )));
    let devices = Arc::new(StaticMediaDevices::new(config.media.clone()));

    let (orchestrator, call) = CallOrchestrator::new(
        config.identity.id.clone(),
        Arc::new(channel.clone()),
        factory,
        devices,
        events.clone(),
    );
    let orchestrator_task = tokio::spawn(orchestrator.run(channel.subscribe(), channel.state_watch()));

    if let Some(room_id) = config.call.room_id {
        call.join_room(room_id)?;
        if args.start {
            call.start_call()?;
        }
        if args.start || config.call.auto_join {
            call.join_call()?;
        }
    } else if args.start || config.call.auto_join {
        tracing::warn!("--start/--join given without a room, ignoring");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    if call.view().session.active {
        call.leave_call()?;
    }
    call.shutdown()?;
    if let Err(e) = orchestrator_task.await {
        tracing::error!("Call orchestrator task failed: {}", e);
    }
    channel.close();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Fold CLI arguments into the loaded configuration
fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(url) = &args.relay_url {
        config.relay.url = url.clone();
    }
    if let Some(token) = args.token.as_ref().filter(|t| !t.is_empty()) {
        config.relay.token = Some(token.clone());
    }
    if let Some(identity) = &args.identity {
        config.identity.id = identity.clone();
    }
    if let Some(room) = args.room {
        config.call.room_id = Some(room);
    }
    if args.join {
        config.call.auto_join = true;
    }
    if args.view_only {
        config.media.camera = false;
        config.media.microphone = false;
    }
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!("Event {}: {}", event.event_name(), json),
                    Err(e) => tracing::warn!("Cannot serialize {}: {}", event.event_name(), e),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged, {} events skipped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "meshcall=error,webrtc=error",
        LogLevel::Warn => "meshcall=warn,webrtc=warn",
        LogLevel::Info => "meshcall=info,webrtc=warn",
        LogLevel::Verbose => "meshcall=debug,webrtc=warn",
        LogLevel::Debug => "meshcall=debug,webrtc=info",
        LogLevel::Trace => "meshcall=trace,webrtc=debug",
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
