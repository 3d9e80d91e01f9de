//! Spout-capture: websocket record capture with arrival statistics.
//!
//! Usage:
//!   spout-capture [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/capture.toml)
//!   --url <URL>             Feed websocket URL (overrides config)
//!   --duration-ms <MS>      Bounded sample length, 0 to run until stopped
//!   --log-level <LEVEL>     Log level (overrides config)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use spout_core::{ArrivalStats, IngestListener, RecordBuffer, SessionConfig, StreamSession};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spout_capture::config::CaptureConfig;
use spout_capture::ws::WsTransport;

/// CLI arguments for spout-capture.
#[derive(Parser, Debug)]
#[command(name = "spout-capture")]
#[command(about = "Websocket record capture with arrival statistics")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/capture.toml")]
    config: PathBuf,

    /// Feed websocket URL (overrides config file)
    #[arg(long)]
    url: Option<String>,

    /// Bounded sample length in milliseconds, 0 to run until stopped
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Log level (overrides config file)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let mut config = if args.config.exists() {
        CaptureConfig::from_file(&args.config)?
    } else {
        warn!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        CaptureConfig::default()
    };

    // Apply CLI overrides
    config.apply_overrides(args.url, args.duration_ms, args.log_level);

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting spout-capture");
    info!("Feed URL: {}", config.feed.url);
    match config.sample_duration {
        Some(duration) => info!("Sample duration: {:?}", duration),
        None => info!("Sample duration: unbounded"),
    }

    if let Some(subscribe_message) = &config.feed.subscribe_message
        && serde_json::from_str::<serde_json::Value>(subscribe_message).is_err()
    {
        warn!("Subscribe message is not valid JSON, sending it as-is");
    }

    // Build the capture pipeline
    let stats = Arc::new(ArrivalStats::new());
    let buffer = Arc::new(RecordBuffer::new());
    let listener = Arc::new(IngestListener::new(Arc::clone(&stats), Arc::clone(&buffer)));
    let session_config = match config.sample_duration {
        Some(duration) => SessionConfig::bounded(duration),
        None => SessionConfig::unbounded(),
    };
    let session = Arc::new(StreamSession::new(
        WsTransport::new(config.feed.clone()),
        listener,
        session_config,
    ));
    info!("Session {} created", session.session_id());

    // Create shutdown channel (capacity for all subscribers)
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    // Spawn session task
    let mut session_handle = spawn_session_task(Arc::clone(&session));
    info!("Session task started");

    // Spawn health logging task
    let health_handle = spawn_health_task(
        Arc::clone(&stats),
        Arc::clone(&buffer),
        config.health_log_interval,
        shutdown_tx.subscribe(),
    );
    info!("Health logging task started");

    let mut session_done = false;

    // Handle shutdown signals
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = &mut session_handle => {
                session_done = true;
                info!("Session finished on its own");
            }
        }
    }

    #[cfg(windows)]
    {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Received Ctrl+C");
            }
            _ = &mut session_handle => {
                session_done = true;
                info!("Session finished on its own");
            }
        }
    }

    // Stop the session and the helper tasks
    info!("Initiating graceful shutdown...");
    session.stop();
    let _ = shutdown_tx.send(());

    // Wait for all tasks to complete with timeout
    let shutdown_timeout = Duration::from_secs(10);

    tokio::select! {
        _ = async {
            if !session_done {
                let _ = (&mut session_handle).await;
            }
            let _ = health_handle.await;
        } => {
            info!("All tasks completed");
        }
        _ = tokio::time::sleep(shutdown_timeout) => {
            warn!("Shutdown timeout exceeded, forcing exit");
        }
    }

    // Final stats
    let records = buffer.drain();
    let snapshot = stats.snapshot();
    info!(
        "Capture finished: {} records drained, {} arrivals, mean interval {:.3} ms",
        records.len(),
        snapshot.arrivals,
        snapshot.mean_us / 1000.0
    );
    info!("Shutdown complete");

    Ok(())
}

/// Spawn the session task.
fn spawn_session_task(session: Arc<StreamSession<WsTransport>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = session.run().await {
            error!("Session error: {e}");
        }
    })
}

/// Spawn the health logging task.
fn spawn_health_task(
    stats: Arc<ArrivalStats>,
    buffer: Arc<RecordBuffer>,
    log_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(log_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let snapshot = stats.snapshot();
                    info!(
                        "Health: arrivals={}, mean_interval_ms={:.3}, buffered={}, total_appended={}",
                        snapshot.arrivals,
                        snapshot.mean_us / 1000.0,
                        buffer.len(),
                        buffer.total_appended(),
                    );
                }
                _ = shutdown.recv() => {
                    info!("Health logger received shutdown signal");
                    break;
                }
            }
        }
    })
}
