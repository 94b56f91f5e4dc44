//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `http` - HTTP router (ingest adapter, health, WebSocket route)
//! - `ws` - WebSocket connection lifecycle
//! - `upstream` - HTTP client for the external status/persistence service
//! - `store` - Fire-and-forget forwarding to the upstream durable store
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod http;
pub mod prometheus;
pub mod store;
pub mod upstream;
pub mod ws;

// Re-export commonly used types
pub use http::AppState;
pub use store::{create_store_channel, StoreForwarder, StoreSender};
pub use upstream::{PackageStatusSource, UpstreamClient};
