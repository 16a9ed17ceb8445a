//! Configuration types for apps-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DnsError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Service discovery registry configuration.
    pub svcdiscovery: DiscoveryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Time budget for a single query, discovery call included.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Idle timeout for TCP client connections.
    #[serde(default = "default_tcp_timeout_secs")]
    pub tcp_timeout_secs: u64,

    /// Resolvers that receive queries the registry cannot answer.
    /// Tried in order. When empty, deferred queries fail with SERVFAIL.
    #[serde(default)]
    pub upstreams: Vec<SocketAddr>,
}

impl DnsConfig {
    /// Per-query time budget.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// TCP connection idle timeout.
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }
}

/// Service discovery registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// CA bundle (PEM) used to verify the registry.
    pub tls_ca_path: PathBuf,

    /// Client certificate (PEM) presented to the registry.
    pub tls_client_cert_path: PathBuf,

    /// Client private key (PEM) matching `tls_client_cert_path`.
    pub tls_client_key_path: PathBuf,

    /// Registry hostname or IP address.
    pub sdc_host: String,

    /// Registry port.
    pub sdc_port: u16,

    /// TTL stamped on every synthesized record, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// API version path segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// TCP connect timeout. Combined with `tls_handshake_timeout_ms`.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// TLS handshake timeout.
    ///
    /// The HTTP client only has one connect timeout covering dial and
    /// handshake, so this is added to `dial_timeout_ms`. A fast dial leaves
    /// the handshake the unused part of the combined budget, not just this value.
    #[serde(default = "default_tls_handshake_timeout_ms")]
    pub tls_handshake_timeout_ms: u64,

    /// TCP keepalive interval for pooled connections.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Maximum idle pooled connections kept per registry host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl DiscoveryConfig {
    /// Reject settings that can never produce a working client.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.sdc_host.trim().is_empty() {
            return Err(DnsError::Config("svcdiscovery.sdc_host must be set".to_string()));
        }
        if self.sdc_port == 0 {
            return Err(DnsError::Config("svcdiscovery.sdc_port must be non-zero".to_string()));
        }
        if self.api_version.is_empty() || self.api_version.contains('/') {
            return Err(DnsError::Config(format!(
                "svcdiscovery.api_version {:?} is not a single path segment",
                self.api_version
            )));
        }
        Ok(())
    }

    /// Time allowed to establish a connection, TCP dial and TLS handshake combined.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms + self.tls_handshake_timeout_ms)
    }

    /// TCP keepalive interval.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "apps_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "apps-dns".to_string()
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_tcp_timeout_secs() -> u64 {
    30
}

fn default_ttl() -> u32 {
    60
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_dial_timeout_ms() -> u64 {
    2000
}

fn default_tls_handshake_timeout_ms() -> u64 {
    1000
}

fn default_keepalive_secs() -> u64 {
    600
}

fn default_pool_max_idle_per_host() -> usize {
    1024
}
