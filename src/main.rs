//! # Robot Link
//!
//! On-robot agent pairing the vehicle with a remote operator.
//!
//! Registers with the signaling relay under a fresh device id, answers the
//! operator's WebRTC offers, and bridges the data channel to the motor
//! controller on the serial port.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use robot_link::config::{Config, LoggingConfig};
use robot_link::control::ControlQueue;
use robot_link::identity::DeviceIdentity;
use robot_link::media::H264Track;
use robot_link::negotiation::rtc::RtcPeerFactory;
use robot_link::negotiation::NegotiationEngine;
use robot_link::serial::{MotorSerial, VoltageReader};
use robot_link::session::tasks::{run_control_writer, run_serial_reader, run_telemetry_loop};
use robot_link::session::SessionCoordinator;
use robot_link::signaling::transport::TungsteniteConnector;
use robot_link::signaling::SignalingClient;
use robot_link::telemetry::HostTelemetrySource;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "robot-link", version, about = "Teleoperation agent for the robot")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signaling relay URL, overrides the configuration file
    #[arg(long)]
    signaling_url: Option<String>,
}

/// Main entry point for Robot Link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Generate the device identity for this run
///    - Open the motor controller (fatal if missing)
///
/// 2. **Running**
///    - Signaling client keeps the relay connection alive
///    - Session coordinator negotiates with the operator
///    - Control writer, telemetry loop and serial reader run alongside
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C cancels every task
///    - Active peer connection and relay socket are closed
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be loaded or is invalid
/// - No motor controller can be opened
/// - The WebRTC stack cannot be initialized
///
/// # Examples
///
/// ```bash
/// robot-link --config /etc/robot-link.toml
/// RUST_LOG=robot_link=debug robot-link --signaling-url ws://relay.local:5003/connect
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = args.signaling_url {
        config.signaling.url = url;
        config.validate().context("Invalid --signaling-url")?;
    }

    let _log_guard = init_logging(&config.logging);

    info!("Robot Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let identity = DeviceIdentity::generate();
    info!("Device id: {}", identity);

    let (serial, serial_reader) = MotorSerial::open(&config.serial)?;
    info!("Motor controller opened at: {}", serial.device_path());

    let cancel = CancellationToken::new();
    let queue = Arc::new(ControlQueue::new());

    let (signaling, inbound) = SignalingClient::connect(
        TungsteniteConnector,
        &config.signaling.url,
        &identity,
        Duration::from_millis(config.signaling.reconnect_delay_ms),
    );
    let signaling = Arc::new(signaling);

    // Encoded video is pushed into this track by the camera pipeline
    let video = Arc::new(H264Track::new());
    let factory = RtcPeerFactory::new(&config.webrtc, video)
        .context("Failed to initialize WebRTC")?;

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let engine = NegotiationEngine::new(Arc::new(factory), peer_tx);
    let (coordinator, channel) =
        SessionCoordinator::new(engine, signaling.clone(), queue.clone(), &config.safety);

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(coordinator.run(inbound, peer_rx, cancel.clone()));
    tasks.spawn(run_control_writer(queue, serial, cancel.clone()));
    tasks.spawn(run_telemetry_loop(
        Arc::new(HostTelemetrySource::new(&config.telemetry)),
        channel.clone(),
        Duration::from_millis(config.telemetry.interval_ms),
        cancel.clone(),
    ));
    tasks.spawn(run_serial_reader(VoltageReader::new(serial_reader), channel, cancel.clone()));

    info!("Waiting for an operator. Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!("Task ended abnormally: {}", e);
        }
    }
    signaling.shutdown().await;

    info!("Robot Link stopped");
    Ok(())
}

/// Console logging plus an optional daily log file
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let console = tracing_subscriber::fmt::layer().with_filter(filter());

    if config.directory.is_empty() {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.directory, "robot-link.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());

    tracing_subscriber::registry().with(console).with(file).init();
    Some(guard)
}
