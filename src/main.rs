use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avshare::config::{
    AppConfig, CaptureConfig, StreamConfig, WebConfig, DEFAULT_CAPTURE_RETRIES,
    DEFAULT_CAPTURE_RETRY_DELAY_SECS, DEFAULT_ICE_GATHER_TIMEOUT_MS, DEFAULT_STUN_SERVER,
};
use avshare::media::{
    display_label, resolve_config, CaptureEngine, DeviceInfo, MediaManager, SystemCaptureEngine,
};
use avshare::state::AppState;
use avshare::web;
use avshare::webrtc::{RtcNegotiationEngine, SessionRegistry, WebRtcConfig};

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

/// avshare command line arguments
#[derive(Parser, Debug)]
#[command(name = "avshare")]
#[command(version, about = "Share a local camera and microphone with browsers over WebRTC", long_about = None)]
struct CliArgs {
    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Video device: id, label or hex-encoded label
    #[arg(short = 'v', long = "video", value_name = "ID")]
    video: Option<String>,

    /// Audio device: id, label or hex-encoded label
    #[arg(short = 'a', long = "audio", value_name = "ID")]
    audio: Option<String>,

    /// Listen address
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    address: IpAddr,

    /// HTTP port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8080)]
    port: u16,

    /// Viewer page served at /
    #[arg(long, value_name = "FILE", default_value = "./client.html")]
    client_html: PathBuf,

    /// STUN server URL (repeatable)
    #[arg(long = "stun-server", value_name = "URL", default_values_t = [DEFAULT_STUN_SERVER.to_string()])]
    stun_servers: Vec<String>,

    /// Capture width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Capture height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Capture frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Video bitrate in bps
    #[arg(long, default_value_t = 1_500_000)]
    video_bitrate: u32,

    /// Audio bitrate in bps
    #[arg(long, default_value_t = 64_000)]
    audio_bitrate: u32,

    /// Capture attempts before giving up
    #[arg(long, default_value_t = DEFAULT_CAPTURE_RETRIES)]
    capture_retries: u32,

    /// Seconds between capture attempts
    #[arg(long, default_value_t = DEFAULT_CAPTURE_RETRY_DELAY_SECS)]
    capture_retry_delay_secs: u64,

    /// How long to wait for ICE gathering before answering (ms)
    #[arg(long, default_value_t = DEFAULT_ICE_GATHER_TIMEOUT_MS)]
    ice_gather_timeout_ms: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (--verbose for verbose, twice for debug, three times for trace)
    #[arg(long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn to_config(&self) -> AppConfig {
        AppConfig {
            capture: CaptureConfig {
                video_identifier: self.video.clone(),
                audio_identifier: self.audio.clone(),
                width: self.width,
                height: self.height,
                fps: self.fps,
                video_bitrate: self.video_bitrate,
                audio_bitrate: self.audio_bitrate,
                retries: self.capture_retries,
                retry_delay_secs: self.capture_retry_delay_secs,
            },
            stream: StreamConfig {
                stun_servers: self.stun_servers.clone(),
                ice_gather_timeout_ms: self.ice_gather_timeout_ms,
            },
            web: WebConfig {
                http_port: self.port,
                bind_address: self.address.to_string(),
                client_html: self.client_html.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let engine = Arc::new(SystemCaptureEngine::new());
    let devices = engine.enumerate_devices();

    if args.list_devices {
        print_devices(&devices);
        return Ok(());
    }

    tracing::info!("Starting avshare v{}", env!("CARGO_PKG_VERSION"));
    let config = args.to_config();

    let resolved = resolve_config(
        config.capture.video_identifier.as_deref(),
        config.capture.audio_identifier.as_deref(),
        &devices,
    )?;
    tracing::info!(
        "Using video device {:?}, audio device {:?}",
        resolved.video_device_id,
        resolved.audio_device_id
    );

    let media = Arc::new(MediaManager::from_config(engine, &config.capture));
    media.initialize(&resolved).await?;
    tracing::info!(
        "Media ready (video: {}, audio: {})",
        media.is_video_enabled(),
        media.is_audio_enabled()
    );

    let negotiation = Arc::new(RtcNegotiationEngine::new(WebRtcConfig::from(&config.stream)));
    let registry = Arc::new(SessionRegistry::new());
    let bind_addr = SocketAddr::new(args.address, config.web.http_port);
    let state = AppState::new(config, media, registry, negotiation);

    let app = web::create_router(state.clone());

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            state.shutdown().await;
            return Err(anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e));
        }
    };
    tracing::info!("Starting HTTP server on http://{}", bind_addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let server = axum::serve(listener, app);

    tokio::select! {
        _ = shutdown_signal => {}
        result = async move { server.await } => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    state.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with level and verbosity
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "avshare=error,tower_http=error",
        LogLevel::Warn => "avshare=warn,tower_http=warn",
        LogLevel::Info => "avshare=info,tower_http=info",
        LogLevel::Verbose => "avshare=debug,tower_http=info",
        LogLevel::Debug => "avshare=debug,tower_http=debug",
        LogLevel::Trace => "avshare=trace,tower_http=debug",
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

fn print_devices(devices: &[DeviceInfo]) {
    println!("Available media devices:");
    for line in device_lines(devices) {
        println!("{}", line);
    }
}

fn device_lines(devices: &[DeviceInfo]) -> Vec<String> {
    if devices.is_empty() {
        return vec!["  No devices found.".to_string()];
    }

    devices
        .iter()
        .map(|d| {
            format!(
                "  - Kind: {:?}, ID: '{}', Label: '{}'",
                d.kind,
                d.device_id,
                display_label(&d.label)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use avshare::media::DeviceKind;

    #[test]
    fn test_defaults() {
        let args = CliArgs::parse_from(["avshare", "-v", "cam"]);
        let config = args.to_config();

        assert_eq!(config.capture.video_identifier.as_deref(), Some("cam"));
        assert_eq!(config.capture.audio_identifier, None);
        assert_eq!(config.capture.retries, 5);
        assert_eq!(config.stream.stun_servers, vec![DEFAULT_STUN_SERVER]);
        assert_eq!(config.stream.ice_gather_timeout_ms, 5000);
        assert_eq!(config.web.http_port, 8080);
        assert_eq!(config.web.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_repeatable_stun_servers() {
        let args = CliArgs::parse_from([
            "avshare",
            "-a",
            "default",
            "--stun-server",
            "stun:a:3478",
            "--stun-server",
            "stun:b:3478",
            "--verbose",
            "--verbose",
        ]);
        assert_eq!(args.stun_servers, vec!["stun:a:3478", "stun:b:3478"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_device_lines() {
        assert_eq!(device_lines(&[]), vec!["  No devices found."]);

        let devices = vec![DeviceInfo::new(
            "/dev/video0",
            "55534220436167",
            DeviceKind::VideoInput,
        )];
        assert_eq!(
            device_lines(&devices),
            vec!["  - Kind: VideoInput, ID: '/dev/video0', Label: 'USB Cag (hex: 55534220436167)'"]
        );
    }
}
