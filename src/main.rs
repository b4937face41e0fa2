use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webcam_streamer::config::ConfigStore;
use webcam_streamer::state::AppState;
use webcam_streamer::video::{
    select_initial_device, DeviceCatalog, StreamSession, V4l2Catalog, V4l2Opener,
};
use webcam_streamer::web;

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

/// Webcam Streamer command line arguments
#[derive(Parser, Debug)]
#[command(name = "webcam-streamer")]
#[command(version, about = "Live MJPEG streaming of V4L2 cameras", long_about = None)]
struct CliArgs {
    /// Configuration file (JSON); defaults are used when it does not exist
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Initial camera index (overrides config and auto-selection)
    #[arg(short = 'd', long, value_name = "INDEX")]
    device: Option<u32>,

    /// JPEG quality 1-100 (overrides config)
    #[arg(short = 'q', long, value_name = "QUALITY")]
    quality: Option<u32>,

    /// Write the effective configuration back to the config file
    #[arg(long, requires = "config")]
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

    tracing::info!("Starting Webcam Streamer v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::open(args.config.as_deref()).await?;
    let mut config = (*config_store.get()).clone();

    // Apply CLI argument overrides to config (only if explicitly specified)
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(device) = args.device {
        config.video.device = Some(device);
    }
    if let Some(quality) = args.quality {
        config.video.jpeg_quality = quality;
    }
    config.validate()?;

    if args.save_config {
        let effective = config.clone();
        config_store.update(move |c| *c = effective).await?;
        tracing::info!("Configuration saved");
    }

    let video = config.video.clone();
    let catalog = Arc::new(V4l2Catalog::new(
        video.even_index_only,
        video.fallback_resolutions.clone(),
    ));

    let devices = catalog.list_devices();
    if devices.is_empty() {
        tracing::warn!("No capture devices found");
    }
    for (id, name) in &devices {
        tracing::info!("Camera {}: {}", id, name);
    }

    let initial = match video.device {
        Some(id) => id,
        None => select_initial_device(catalog.as_ref()),
    };
    tracing::info!("Using camera {}", initial);

    let opener = Arc::new(V4l2Opener::new(video.buffer_count, video.read_timeout()));
    let session = Arc::new(StreamSession::new(opener, catalog, video));
    session
        .start(initial)
        .await
        .with_context(|| format!("failed to open camera {}", initial))?;

    let bind_ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.web.bind_address))?;
    let addr = SocketAddr::new(bind_ip, config.web.http_port);

    let state = AppState::new(Arc::new(config), session.clone(), devices);
    let app = web::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Serving on http://{}", addr);

    let shutdown_session = session.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        // Ends every open MJPEG stream so the server can drain
        shutdown_session.shutdown().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // No-op when the signal handler already closed the session
    session.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
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
        LogLevel::Error => "webcam_streamer=error,tower_http=error",
        LogLevel::Warn => "webcam_streamer=warn,tower_http=warn",
        LogLevel::Info => "webcam_streamer=info,tower_http=info",
        LogLevel::Verbose => "webcam_streamer=debug,tower_http=info",
        LogLevel::Debug => "webcam_streamer=debug,tower_http=debug",
        LogLevel::Trace => "webcam_streamer=trace,tower_http=debug",
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
