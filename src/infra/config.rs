//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Instance identifier used as the metrics `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "relay".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the external status/persistence service
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// Deadline for a package status lookup
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Deadline for a position store write
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Capacity of the store forwarder queue
    #[serde(default = "default_store_queue_capacity")]
    pub store_queue_capacity: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            status_timeout_ms: default_status_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            store_queue_capacity: default_store_queue_capacity(),
        }
    }
}

fn default_upstream_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_status_timeout_ms() -> u64 {
    1500
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_store_queue_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// Per-connection writer queue depth; full queues drop messages
    #[serde(default = "default_ws_send_buffer")]
    pub send_buffer: usize,
    /// Maximum inbound frame size in bytes
    #[serde(default = "default_ws_max_message_size")]
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            send_buffer: default_ws_send_buffer(),
            max_message_size: default_ws_max_message_size(),
        }
    }
}

fn default_ws_send_buffer() -> usize {
    256
}

fn default_ws_max_message_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    bind_address: String,
    port: u16,
    upstream_base_url: String,
    status_timeout_ms: u64,
    store_timeout_ms: u64,
    store_queue_capacity: usize,
    ws_send_buffer: usize,
    ws_max_message_size: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            bind_address: toml_config.server.bind_address,
            port: toml_config.server.port,
            upstream_base_url: toml_config.upstream.base_url,
            status_timeout_ms: toml_config.upstream.status_timeout_ms,
            store_timeout_ms: toml_config.upstream.store_timeout_ms,
            store_queue_capacity: toml_config.upstream.store_queue_capacity,
            ws_send_buffer: toml_config.ws.send_buffer,
            ws_max_message_size: toml_config.ws.max_message_size,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn upstream_base_url(&self) -> &str {
        &self.upstream_base_url
    }

    pub fn status_timeout_ms(&self) -> u64 {
        self.status_timeout_ms
    }

    pub fn store_timeout_ms(&self) -> u64 {
        self.store_timeout_ms
    }

    pub fn store_queue_capacity(&self) -> usize {
        self.store_queue_capacity
    }

    pub fn ws_send_buffer(&self) -> usize {
        self.ws_send_buffer
    }

    pub fn ws_max_message_size(&self) -> usize {
        self.ws_max_message_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the upstream base URL
    #[cfg(test)]
    pub fn with_upstream_base_url(mut self, base_url: &str) -> Self {
        self.upstream_base_url = base_url.to_string();
        self
    }

    /// Builder method for tests to set the status lookup deadline
    #[cfg(test)]
    pub fn with_status_timeout_ms(mut self, ms: u64) -> Self {
        self.status_timeout_ms = ms;
        self
    }

    /// Builder method for tests to set the store write deadline
    #[cfg(test)]
    pub fn with_store_timeout_ms(mut self, ms: u64) -> Self {
        self.store_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "relay");
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.port(), 3000);
        assert_eq!(config.upstream_base_url(), "http://localhost:8000/api");
        assert_eq!(config.status_timeout_ms(), 1500);
        assert_eq!(config.store_timeout_ms(), 2000);
        assert_eq!(config.store_queue_capacity(), 1000);
        assert_eq!(config.ws_send_buffer(), 256);
        assert_eq!(config.metrics_interval_secs(), 10);
        assert_eq!(config.prometheus_port(), 9090);
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[server]
port = 4000
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.port(), 4000);
        assert_eq!(config.bind_address(), "0.0.0.0");
        assert_eq!(config.status_timeout_ms(), 1500);
        assert_eq!(config.site_id(), "relay");
    }

    #[test]
    fn test_load_from_missing_path_falls_back() {
        let config = Config::load_from_path("config/does-not-exist.toml");
        assert_eq!(config.port(), 3000);
        assert_eq!(config.config_file(), "default");
    }
}
