//! HTTP client for the external status/persistence service
//!
//! Both calls are best-effort with bounded deadlines. A failed status
//! lookup resolves to "status unknown" upstream of the eligibility
//! policy; a failed store write is logged and discarded.

use crate::domain::types::{CourierPosition, DeliveryStatus, PackageId};
use crate::infra::config::Config;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Source of delivery statuses; the production implementation is
/// [`UpstreamClient`], tests substitute scripted sources.
#[async_trait]
pub trait PackageStatusSource: Send + Sync {
    /// Fetch the current delivery status for a package.
    ///
    /// `Ok(None)` means the upstream answered but no status could be
    /// read from the response (non-success or unexpected body).
    async fn fetch_status(&self, package_id: PackageId)
        -> Result<Option<DeliveryStatus>, BoxError>;
}

/// Package resource body. The upstream exposes the status either at
/// the top level or wrapped in a `data` envelope; both are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PackageBody {
    Wrapped { data: PackageFields },
    Bare(PackageFields),
}

#[derive(Debug, Deserialize)]
struct PackageFields {
    #[serde(default)]
    status: Option<String>,
}

impl PackageBody {
    fn status(self) -> Option<String> {
        match self {
            PackageBody::Wrapped { data } => data.status,
            PackageBody::Bare(fields) => fields.status,
        }
    }
}

pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    status_timeout: Duration,
    store_timeout: Duration,
}

impl UpstreamClient {
    /// Create the client once for reuse (connection pooling).
    /// Deadlines are applied per request; the two calls have
    /// independent budgets.
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.upstream_base_url().trim_end_matches('/').to_string(),
            status_timeout: Duration::from_millis(config.status_timeout_ms()),
            store_timeout: Duration::from_millis(config.store_timeout_ms()),
        }
    }

    /// Write a position sample to the upstream durable store.
    ///
    /// Callers treat any failure as non-fatal; this returns the error
    /// only so the forwarder can log and count it.
    pub async fn store_position(&self, position: &CourierPosition) -> Result<(), BoxError> {
        let start = Instant::now();
        let url = format!("{}/location/store", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(self.store_timeout)
            .json(position)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("upstream store returned {}", status.as_u16()).into());
        }

        debug!(
            courier_id = %position.courier_id,
            latency_us = start.elapsed().as_micros() as u64,
            "upstream_store_ok"
        );
        Ok(())
    }
}

#[async_trait]
impl PackageStatusSource for UpstreamClient {
    async fn fetch_status(
        &self,
        package_id: PackageId,
    ) -> Result<Option<DeliveryStatus>, BoxError> {
        let start = Instant::now();
        let url = format!("{}/packages/{}", self.base_url, package_id);

        let response = self
            .client
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await?;

        let http_status = response.status();
        if !http_status.is_success() {
            info!(
                package_id = %package_id,
                status = http_status.as_u16(),
                "upstream_status_non_success"
            );
            return Ok(None);
        }

        let body: PackageBody = response.json().await?;
        let delivery_status = body.status().map(DeliveryStatus::from);

        debug!(
            package_id = %package_id,
            delivery_status = delivery_status.as_ref().map(DeliveryStatus::as_str),
            latency_us = start.elapsed().as_micros() as u64,
            "upstream_status_fetched"
        );
        Ok(delivery_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CourierId;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> UpstreamClient {
        let config = Config::default()
            .with_upstream_base_url(&server.uri())
            .with_status_timeout_ms(500)
            .with_store_timeout_ms(500);
        UpstreamClient::new(&config)
    }

    fn sample_position() -> CourierPosition {
        CourierPosition {
            courier_id: CourierId(7),
            latitude: 10.5,
            longitude: 20.25,
            speed: None,
            heading: None,
            package_id: Some(PackageId(99)),
            timestamp: "2026-08-07T12:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_status_bare_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/99"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "id": 99,
                    "status": "in transit"
                })),
            )
            .mount(&server)
            .await;

        let status = client_for(&server).fetch_status(PackageId(99)).await.unwrap();
        assert_eq!(status, Some(DeliveryStatus::from("in transit")));
    }

    #[tokio::test]
    async fn test_fetch_status_wrapped_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/99"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "data": {"id": 99, "status": "delivered"}
                })),
            )
            .mount(&server)
            .await;

        let status = client_for(&server).fetch_status(PackageId(99)).await.unwrap();
        assert_eq!(status, Some(DeliveryStatus::from("delivered")));
    }

    #[tokio::test]
    async fn test_fetch_status_non_success_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let status = client_for(&server).fetch_status(PackageId(99)).await.unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn test_fetch_status_body_without_status_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 99})))
            .mount(&server)
            .await;

        let status = client_for(&server).fetch_status(PackageId(99)).await.unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn test_fetch_status_timeout_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages/99"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "in transit"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let result = client_for(&server).fetch_status(PackageId(99)).await;
        assert!(result.is_err(), "deadline must cut the request short");
    }

    #[tokio::test]
    async fn test_store_position_posts_sample() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/location/store"))
            .and(body_partial_json(serde_json::json!({
                "courier_id": 7,
                "latitude": 10.5,
                "longitude": 20.25,
                "package_id": 99
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).store_position(&sample_position()).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_position_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/location/store"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client_for(&server).store_position(&sample_position()).await;
        assert!(result.is_err());
    }
}
