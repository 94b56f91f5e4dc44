//! Shared types for the courier relay

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype wrapper for courier IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CourierId(pub i64);

impl std::fmt::Display for CourierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for package IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PackageId(pub i64);

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound position payload, from the HTTP ingest endpoint or a
/// `location:update` connection message
#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdate {
    pub courier_id: CourierId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub package_id: Option<PackageId>,
    /// ISO 8601; server assigns current time when absent
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LocationUpdate {
    /// Validate the payload into an accepted position.
    ///
    /// Latitude must be within [-90, 90] and longitude within
    /// [-180, 180]; NaN fails both range checks. No state is touched
    /// on rejection.
    pub fn into_position(self) -> Result<CourierPosition, RelayError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(RelayError::InvalidPayload(format!(
                "latitude must be between -90 and 90, got {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RelayError::InvalidPayload(format!(
                "longitude must be between -180 and 180, got {}",
                self.longitude
            )));
        }

        Ok(CourierPosition {
            courier_id: self.courier_id,
            latitude: self.latitude,
            longitude: self.longitude,
            speed: self.speed,
            heading: self.heading,
            package_id: self.package_id,
            timestamp: self.timestamp.unwrap_or_else(now_rfc3339),
        })
    }
}

/// Current UTC time as an RFC 3339 string with millisecond precision
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An accepted position sample. Immutable once constructed; a new
/// sample replaces, never merges with, the previous one for a courier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierPosition {
    pub courier_id: CourierId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub package_id: Option<PackageId>,
    pub timestamp: String,
}

/// Delivery status string fetched from the external service.
///
/// Opaque except for the single sentinel comparison that gates
/// merchant-channel forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus(String);

/// The only status value that makes a package channel eligible
pub const STATUS_IN_TRANSIT: &str = "in transit";

impl DeliveryStatus {
    pub fn is_in_transit(&self) -> bool {
        self.0 == STATUS_IN_TRANSIT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeliveryStatus {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeliveryStatus {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors surfaced to the originating client. Upstream failures are
/// deliberately absent: those resolve via the eligibility fallback or
/// are dropped after logging, and never reach a client.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{0} required")]
    MissingField(&'static str),
}
