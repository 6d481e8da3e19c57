use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamcaster::config::ConfigStore;
use streamcaster::events::{EventBus, SystemEvent};
use streamcaster::session::{SessionState, SessionSupervisor};
use streamcaster::video::{CaptureToken, SyntheticCapturerFactory};
use streamcaster::webrtc::{MediaEngine, SignalingMessage};

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

/// Streamcaster command line arguments
#[derive(Parser, Debug)]
#[command(name = "streamcaster")]
#[command(version, about = "Share the screen over a single WebRTC session", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML); defaults apply when it does not exist
    #[arg(short = 'c', long, value_name = "FILE", default_value = "streamcaster.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Stop the session after this many seconds
    #[arg(short = 'd', long, value_name = "SECS")]
    duration_secs: Option<u64>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!(
        "Starting streamcaster v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    let store = ConfigStore::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.dump_config {
        store.save(&args.config).await?;
        return Ok(());
    }

    let config = store.get();
    let events = Arc::new(EventBus::new());
    let supervisor = SessionSupervisor::new(
        MediaEngine::webrtc(config.engine_config()),
        Arc::new(SyntheticCapturerFactory::new()),
        events.clone(),
    );

    let signaling = tokio::spawn(emit_signaling(events.subscribe()));

    // The synthetic capturer stands in for an OS capture grant
    let (token, _grant) = CaptureToken::issue("synthetic-display");
    let session = supervisor.begin(token, config.session_config()).await?;

    let status = session.status();
    if status.state != SessionState::Streaming {
        let reason = status
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("session {} ended during startup: {}", session.id(), reason);
    }

    let offer = session.create_offer().await?;
    println!("{}", serde_json::to_string(&SignalingMessage::Offer(offer))?);

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        _ = deadline => tracing::info!("Duration elapsed"),
        status = session.wait_terminal() => {
            tracing::info!("Session ended on its own: {}", status.state);
        }
    }

    supervisor.request_stop().await;
    let status = session.status();
    if let Some(reason) = status.reason {
        tracing::info!("Session {} {}: {}", session.id(), status.state, reason);
    }

    signaling.abort();
    tracing::info!("Bye");
    Ok(())
}

/// Print outbound signaling material (candidates) as JSON lines
async fn emit_signaling(mut rx: broadcast::Receiver<SystemEvent>) {
    loop {
        match rx.recv().await {
            Ok(SystemEvent::SessionIceCandidate { candidate, .. }) => {
                match serde_json::to_string(&SignalingMessage::Candidate(candidate)) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to encode candidate: {}", e),
                }
            }
            Ok(event) => tracing::debug!("Event: {}", event.event_name()),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Signaling output lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "streamcaster=error,webrtc=error",
        LogLevel::Warn => "streamcaster=warn,webrtc=warn",
        LogLevel::Info => "streamcaster=info,webrtc=warn",
        LogLevel::Verbose => "streamcaster=debug,webrtc=warn",
        LogLevel::Debug => "streamcaster=debug,webrtc=info",
        LogLevel::Trace => "streamcaster=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // Logs go to stderr; stdout carries signaling JSON
    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
