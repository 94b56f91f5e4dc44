//! Fire-and-forget forwarding of position samples to the upstream store
//!
//! The broadcast path enqueues and moves on; a dedicated worker drains
//! the queue and performs the write with its own deadline. Failures are
//! logged and counted, never retried, never surfaced to the sender.

use crate::domain::types::CourierPosition;
use crate::infra::metrics::Metrics;
use crate::io::upstream::UpstreamClient;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Sender handle for the store queue
///
/// Clone this to share across producers. Non-blocking: a full queue
/// drops the sample (at-most-once, best-effort).
#[derive(Clone)]
pub struct StoreSender {
    tx: mpsc::Sender<CourierPosition>,
    metrics: Arc<Metrics>,
}

impl StoreSender {
    pub fn new(tx: mpsc::Sender<CourierPosition>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Enqueue a sample for the forwarder without waiting on the outcome
    pub fn forward(&self, position: CourierPosition) {
        self.metrics.record_store_enqueued();
        if let Err(e) = self.tx.try_send(position) {
            match e {
                TrySendError::Full(_) => {
                    self.metrics.record_store_dropped();
                    debug!("store_sample_dropped: queue full");
                }
                TrySendError::Closed(_) => {
                    self.metrics.record_store_dropped();
                    warn!("store_channel_closed");
                }
            }
        }
    }
}

/// Create a new store channel pair
///
/// Returns (sender, receiver) where the sender can be cloned and
/// shared. Buffer size bounds how many samples may be queued.
pub fn create_store_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (StoreSender, mpsc::Receiver<CourierPosition>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (StoreSender::new(tx, metrics), rx)
}

/// Worker that drains the store queue into the upstream durable store
pub struct StoreForwarder {
    upstream: Arc<UpstreamClient>,
    rx: mpsc::Receiver<CourierPosition>,
    metrics: Arc<Metrics>,
}

impl StoreForwarder {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        rx: mpsc::Receiver<CourierPosition>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { upstream, rx, metrics }
    }

    /// Run the forwarder loop until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("store_forwarder_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("store_forwarder_shutdown");
                        // Drain whatever is already queued
                        while let Ok(position) = self.rx.try_recv() {
                            self.write(position).await;
                        }
                        return;
                    }
                }
                position = self.rx.recv() => {
                    match position {
                        Some(position) => self.write(position).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn write(&self, position: CourierPosition) {
        let start = Instant::now();
        match self.upstream.store_position(&position).await {
            Ok(()) => {
                debug!(
                    courier_id = %position.courier_id,
                    latency_us = start.elapsed().as_micros() as u64,
                    "store_forward_ok"
                );
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(
                    courier_id = %position.courier_id,
                    error = %e,
                    "store_forward_failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CourierId;
    use crate::infra::config::Config;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hold-off to let the worker drain
    const TEST_DRAIN_WAIT: Duration = Duration::from_millis(200);

    fn sample(courier: i64) -> CourierPosition {
        CourierPosition {
            courier_id: CourierId(courier),
            latitude: 10.5,
            longitude: 20.25,
            speed: None,
            heading: None,
            package_id: None,
            timestamp: "2026-08-07T12:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_forward_drops_when_queue_full() {
        let metrics = Arc::new(Metrics::new());
        let (sender, _rx) = create_store_channel(1, metrics.clone());

        sender.forward(sample(1));
        sender.forward(sample(2));

        let summary = metrics.report(0);
        assert_eq!(summary.store_enqueued_total, 2);
        assert_eq!(summary.store_dropped_total, 1);
    }

    #[tokio::test]
    async fn test_forwarder_writes_queued_samples() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/location/store"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let metrics = Arc::new(Metrics::new());
        let config = Config::default().with_upstream_base_url(&server.uri());
        let upstream = Arc::new(UpstreamClient::new(&config));
        let (sender, rx) = create_store_channel(16, metrics.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(
            StoreForwarder::new(upstream, rx, metrics.clone()).run(shutdown_rx),
        );

        sender.forward(sample(1));
        sender.forward(sample(2));
        tokio::time::sleep(TEST_DRAIN_WAIT).await;

        drop(sender);
        worker.await.unwrap();
        assert_eq!(metrics.report(0).store_failures_total, 0);
    }

    #[tokio::test]
    async fn test_forwarder_counts_failures_and_keeps_going() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/location/store"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let metrics = Arc::new(Metrics::new());
        let config = Config::default().with_upstream_base_url(&server.uri());
        let upstream = Arc::new(UpstreamClient::new(&config));
        let (sender, rx) = create_store_channel(16, metrics.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(
            StoreForwarder::new(upstream, rx, metrics.clone()).run(shutdown_rx),
        );

        sender.forward(sample(1));
        sender.forward(sample(2));
        tokio::time::sleep(TEST_DRAIN_WAIT).await;

        drop(sender);
        worker.await.unwrap();
        assert_eq!(metrics.report(0).store_failures_total, 2);
    }
}
