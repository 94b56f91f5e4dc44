//! Prometheus metrics HTTP endpoint
//!
//! Exposes relay metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server, on its own listener so scraping
//! stays independent of the relay's client-facing port.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::engine::BroadcastEngine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    summary: &MetricsSummary,
    cached_positions: usize,
    registered_couriers: usize,
    site_id: &str,
) -> String {
    let mut output = String::with_capacity(8192);

    write_update_metrics(&mut output, site_id, summary);
    write_broadcast_metrics(&mut output, site_id, summary);
    write_status_metrics(&mut output, site_id, summary);
    write_store_metrics(&mut output, site_id, summary);
    write_connection_metrics(&mut output, site_id, summary, cached_positions, registered_couriers);

    output
}

fn write_update_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_updates_total",
        "Total position updates accepted",
        MetricType::Counter,
        site,
        summary.updates_total,
    );
    write_gauge_f64(
        output,
        "relay_updates_per_sec",
        "Position updates accepted per second",
        site,
        summary.updates_per_sec,
    );
    write_metric(
        output,
        "relay_invalid_payloads_total",
        "Position updates rejected as invalid",
        MetricType::Counter,
        site,
        summary.invalid_payloads_total,
    );

    write_histogram(
        output,
        "relay_update_latency_us",
        "Update handling latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_latency_us,
    );
    write_metric(
        output,
        "relay_update_latency_p50_us",
        "50th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_us,
    );
    write_metric(
        output,
        "relay_update_latency_p95_us",
        "95th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_us,
    );
    write_metric(
        output,
        "relay_update_latency_p99_us",
        "99th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_broadcast_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_office_broadcasts_total",
        "Broadcasts published to the office channel",
        MetricType::Counter,
        site,
        summary.office_broadcasts_total,
    );
    write_metric(
        output,
        "relay_package_broadcasts_total",
        "Broadcasts published to package channels",
        MetricType::Counter,
        site,
        summary.package_broadcasts_total,
    );
    write_metric(
        output,
        "relay_client_messages_dropped_total",
        "Messages dropped on full client writer queues",
        MetricType::Counter,
        site,
        summary.client_messages_dropped_total,
    );
}

fn write_status_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_status_lookups_total",
        "Delivery status lookups attempted",
        MetricType::Counter,
        site,
        summary.status_lookups_total,
    );
    write_metric(
        output,
        "relay_status_fallback_total",
        "Lookups that fell back to eligible on failure or timeout",
        MetricType::Counter,
        site,
        summary.status_fallback_total,
    );
    write_metric(
        output,
        "relay_status_suppressed_total",
        "Package broadcasts suppressed by an explicit status",
        MetricType::Counter,
        site,
        summary.status_suppressed_total,
    );
}

fn write_store_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "relay_store_enqueued_total",
        "Position samples enqueued for the upstream store",
        MetricType::Counter,
        site,
        summary.store_enqueued_total,
    );
    write_metric(
        output,
        "relay_store_dropped_total",
        "Position samples dropped due to a full store queue",
        MetricType::Counter,
        site,
        summary.store_dropped_total,
    );
    write_metric(
        output,
        "relay_store_failures_total",
        "Upstream store writes that failed or timed out",
        MetricType::Counter,
        site,
        summary.store_failures_total,
    );
    write_gauge_f64(
        output,
        "relay_store_drop_ratio",
        "Store drop ratio (dropped / enqueued)",
        site,
        summary.store_drop_ratio,
    );
}

fn write_connection_metrics(
    output: &mut String,
    site: &str,
    summary: &MetricsSummary,
    cached_positions: usize,
    registered_couriers: usize,
) {
    write_metric(
        output,
        "relay_connections_opened_total",
        "Connections ever opened",
        MetricType::Counter,
        site,
        summary.connections_opened_total,
    );
    write_metric(
        output,
        "relay_connections",
        "Current live connections",
        MetricType::Gauge,
        site,
        summary.connections_current,
    );
    write_metric(
        output,
        "relay_package_channels",
        "Package channels with at least one viewer",
        MetricType::Gauge,
        site,
        summary.package_channels as u64,
    );
    write_metric(
        output,
        "relay_cached_positions",
        "Couriers with a cached last position",
        MetricType::Gauge,
        site,
        cached_positions as u64,
    );
    write_metric(
        output,
        "relay_registered_couriers",
        "Couriers with a registered connection",
        MetricType::Gauge,
        site,
        registered_couriers as u64,
    );
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
    engine: Arc<BroadcastEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let summary = metrics.report(engine.package_channel_count());
            let body = format_prometheus_metrics(
                &summary,
                engine.cached_positions(),
                engine.registered_couriers(),
                &site_id,
            );
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    engine: Arc<BroadcastEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();
                        let engine = engine.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                let engine = engine.clone();
                                async move { handle_request(req, metrics, site_id, engine).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_update_handled(150);
        metrics.record_update_handled(250);
        metrics.record_office_broadcast();
        metrics.record_package_broadcast();
        metrics.record_connection_opened();
        metrics.record_status_lookup();
        metrics.record_status_fallback();

        let summary = metrics.report(2);
        let output = format_prometheus_metrics(&summary, 5, 3, "relay");

        assert!(output.contains("relay_updates_total{site=\"relay\"} 2"));
        assert!(output.contains("relay_update_latency_us_bucket{site=\"relay\""));
        assert!(output.contains("relay_office_broadcasts_total{site=\"relay\"} 1"));
        assert!(output.contains("relay_status_fallback_total{site=\"relay\"} 1"));
        assert!(output.contains("relay_package_channels{site=\"relay\"} 2"));
        assert!(output.contains("relay_cached_positions{site=\"relay\"} 5"));
        assert!(output.contains("relay_registered_couriers{site=\"relay\"} 3"));
        assert!(output.contains("relay_connections{site=\"relay\"} 1"));
    }

    #[test]
    fn test_histogram_buckets_cumulative() {
        let metrics = Metrics::new();
        metrics.record_update_handled(50);
        metrics.record_update_handled(150);

        let summary = metrics.report(0);
        let output = format_prometheus_metrics(&summary, 0, 0, "relay");

        assert!(output.contains("relay_update_latency_us_bucket{site=\"relay\",le=\"100\"} 1"));
        assert!(output.contains("relay_update_latency_us_bucket{site=\"relay\",le=\"200\"} 2"));
        assert!(output.contains("relay_update_latency_us_bucket{site=\"relay\",le=\"+Inf\"} 2"));
        assert!(output.contains("relay_update_latency_us_count{site=\"relay\"} 2"));
    }
}
