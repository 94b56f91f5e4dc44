//! Courier location relay
//!
//! Relays courier GPS positions in real time to an office dashboard
//! (every courier) and per-package merchant viewers (status-gated),
//! over WebSocket. Stateless at rest apart from an in-memory cache of
//! the last known position per courier; delivery status and durable
//! storage live in an external service reached best-effort.
//!
//! Module structure:
//! - `domain/` - Core types (CourierPosition, protocol envelopes)
//! - `io/` - External interfaces (HTTP, WebSocket, upstream, store, metrics)
//! - `services/` - Broadcast logic (engine, cache, registry, rooms, status)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use courier_relay::infra::{Config, Metrics};
use courier_relay::io::http::AppState;
use courier_relay::io::{create_store_channel, StoreForwarder, UpstreamClient};
use courier_relay::services::{BroadcastEngine, StatusResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Courier location relay - real-time position broadcast server
#[derive(Parser, Debug)]
#[command(name = "courier-relay", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "courier-relay starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind_address = %config.bind_address(),
        port = %config.port(),
        upstream = %config.upstream_base_url(),
        status_timeout_ms = %config.status_timeout_ms(),
        store_timeout_ms = %config.store_timeout_ms(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let upstream = Arc::new(UpstreamClient::new(&config));

    // Store forwarder: fire-and-forget persistence of position samples
    let (store_sender, store_rx) =
        create_store_channel(config.store_queue_capacity(), metrics.clone());
    let forwarder = StoreForwarder::new(upstream.clone(), store_rx, metrics.clone());
    let forwarder_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        forwarder.run(forwarder_shutdown).await;
    });

    let resolver = StatusResolver::new(
        upstream,
        Duration::from_millis(config.status_timeout_ms()),
        metrics.clone(),
    );
    let engine = Arc::new(BroadcastEngine::new(resolver, store_sender, metrics.clone()));

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_engine = engine.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = courier_relay::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_engine,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let reporter_engine = engine.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report(reporter_engine.package_channel_count());
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Client-facing HTTP/WebSocket server
    let state = AppState { engine, metrics, config: Arc::new(config.clone()) };
    let app = courier_relay::io::http::router(state);

    let listener = TcpListener::bind((config.bind_address(), config.port())).await?;
    info!(port = %config.port(), "relay_server_started");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    info!("courier-relay shutdown complete");
    Ok(())
}
