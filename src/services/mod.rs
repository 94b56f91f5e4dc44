//! Services - broadcast logic and shared state
//!
//! This module contains the core relay services:
//! - `engine` - Central broadcast/routing orchestrator
//! - `cache` - Last-known-position cache per courier
//! - `registry` - Courier connection registry
//! - `rooms` - Channel membership and fan-out
//! - `status` - Status-gated forwarding policy

pub mod cache;
pub mod engine;
pub mod registry;
pub mod rooms;
pub mod status;

// Re-export commonly used types
pub use cache::LocationCache;
pub use engine::BroadcastEngine;
pub use registry::ConnectionRegistry;
pub use rooms::{Channel, RoomRouter};
pub use status::{Eligibility, StatusResolver};
