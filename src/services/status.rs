//! Status-gated forwarding policy
//!
//! Decides whether a package channel may receive an update. The lookup
//! is best-effort with a hard deadline; when the upstream cannot prove
//! the package is NOT in transit, the relay assumes it is. Stale
//! tracking beats silently starving merchant viewers behind an
//! unreachable upstream.

use crate::domain::types::PackageId;
use crate::infra::metrics::Metrics;
use crate::io::upstream::PackageStatusSource;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of the eligibility decision for a package channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotEligible,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Eligibility::Eligible
    }
}

pub struct StatusResolver {
    source: Arc<dyn PackageStatusSource>,
    deadline: Duration,
    metrics: Arc<Metrics>,
}

impl StatusResolver {
    pub fn new(source: Arc<dyn PackageStatusSource>, deadline: Duration, metrics: Arc<Metrics>) -> Self {
        Self { source, deadline, metrics }
    }

    /// Resolve package-channel eligibility within the deadline.
    ///
    /// - explicit status: eligible iff it equals "in transit"
    /// - error, timeout, or no status: eligible (fallback)
    pub async fn resolve(&self, package_id: PackageId) -> Eligibility {
        self.metrics.record_status_lookup();

        let outcome = tokio::time::timeout(self.deadline, self.source.fetch_status(package_id)).await;

        match outcome {
            Ok(Ok(Some(status))) => {
                if status.is_in_transit() {
                    Eligibility::Eligible
                } else {
                    self.metrics.record_status_suppressed();
                    debug!(
                        package_id = %package_id,
                        status = status.as_str(),
                        "package_channel_suppressed"
                    );
                    Eligibility::NotEligible
                }
            }
            Ok(Ok(None)) => {
                self.metrics.record_status_fallback();
                debug!(package_id = %package_id, "status_unknown_fallback_eligible");
                Eligibility::Eligible
            }
            Ok(Err(e)) => {
                self.metrics.record_status_fallback();
                warn!(package_id = %package_id, error = %e, "status_lookup_failed");
                Eligibility::Eligible
            }
            Err(_) => {
                self.metrics.record_status_fallback();
                warn!(
                    package_id = %package_id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "status_lookup_timeout"
                );
                Eligibility::Eligible
            }
        }
    }
}
