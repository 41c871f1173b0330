//! Application entry point for the `aquaman-monitor` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Validate the threshold table and build the shared monitor
//! - Seed trend history from the backend's recent rows
//! - Subscribe the monitor to the sensor feed (polling, plus the Socket.IO
//!   push source when `SOCKETIO_PATH` is set)
//! - Serve the HTTP API until Ctrl-C, then stop the feed
//!
//! # Environment Variables
//! - `BACKEND_URL` (**required**) – appliance backend base URL
//! - `MONITOR_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `MONITOR_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the full list.
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aquaman_monitor::config;
use aquaman_monitor::routes;
use aquaman_monitor::source::{BackendClient, SensorFeed, SocketIoConnector};
use aquaman_monitor::{Monitor, ThresholdTable};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let table = ThresholdTable::canonical();
    table.validate().context("Threshold table is inconsistent")?;
    let monitor = Arc::new(Monitor::new(table, cfg.monitor_settings()));

    let client = BackendClient::new(&cfg.backend_url, cfg.request_timeout)?;

    // A backend that is down at startup only costs us history.
    if cfg.history_backfill > 0 {
        match client.recent_readings(cfg.history_backfill).await {
            Ok(rows) => {
                let used = monitor.backfill(rows);
                tracing::info!("Seeded history with {} rows", used);
            }
            Err(e) => tracing::warn!("History backfill failed: {:#}", e),
        }
    }

    let feed = SensorFeed::new(cfg.reconnect_delay);
    let sink = monitor.clone();
    feed.subscribe(move |reading| {
        sink.apply(reading.clone());
    });
    feed.poll(client.clone(), cfg.poll_interval);

    if let Some(path) = &cfg.socketio_path {
        let connector = SocketIoConnector::new(&cfg.backend_url, path, cfg.request_timeout)?;
        tracing::info!("Push stream enabled at {}", connector.url());
        feed.connect(connector);
    }

    let app = routes::router(monitor);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed.disconnect();
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces on, `0|false|no` forces
///   off, anything else auto-detects a TTY
/// - Span events via `MONITOR_SPAN_EVENTS`: `"full"`, `"enter_exit"`, or
///   close events only by default
/// - Level from `RUST_LOG` when set, else `MONITOR_LOG_LEVEL` (default `debug`)
///
/// Call once at startup before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("MONITOR_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("MONITOR_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        // Connection-pool chatter from the HTTP client drowns the feed logs.
        EnvFilter::new(format!("{level},hyper_util=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
