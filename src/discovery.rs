//! Client for the service discovery registry.
//!
//! One GET per query against `<base>/<api-version>/registration/<name>`:
//!
//! ```text
//! GET https://sdc.internal:8054/v1/registration/web.apps.internal.
//!
//! {
//!   "hosts": [
//!     { "ip_address": "10.255.141.235", "last_check_in": "", "port": 0,
//!       "revision": "", "service": "", "service_repo_name": "", "tags": {} }
//!   ],
//!   "env": "",
//!   "service": ""
//! }
//! ```
//!
//! Only `ip_address` is used; every other field, known or not, is ignored.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{debug, trace};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DnsError};
use crate::tls::TlsMaterial;

/// Source of addresses for a queried name.
#[async_trait]
pub trait Discover: Send + Sync {
    /// Addresses registered for `name`, in registry order.
    ///
    /// `Ok(vec![])` means nothing is registered under that name.
    async fn discover(&self, name: &str) -> Result<Vec<String>, DiscoveryError>;
}

/// Registration document returned by the registry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    /// Hosts registered for the name.
    #[serde(default)]
    pub hosts: Vec<RegisteredHost>,
}

/// One registered host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredHost {
    /// Textual IP address of the host.
    #[serde(default)]
    pub ip_address: String,
}

impl Registration {
    /// Host addresses in document order.
    pub fn into_addresses(self) -> Vec<String> {
        self.hosts.into_iter().map(|h| h.ip_address).collect()
    }
}

/// HTTPS client for the registry.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http: Client,
    base: Url,
}

/// Build `https://<host>:<port>/<api_version>/registration`.
pub fn registration_base(host: &str, port: u16, api_version: &str) -> Result<Url, DnsError> {
    let authority = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]:{port}"),
        _ => format!("{host}:{port}"),
    };
    let mut url = Url::parse(&format!("https://{authority}/"))
        .map_err(|e| DnsError::Config(format!("invalid registry address {authority}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| DnsError::Config(format!("registry address {authority} cannot be a base")))?
        .pop_if_empty()
        .extend([api_version, "registration"]);
    Ok(url)
}

impl DiscoveryClient {
    /// Build the mutually authenticated client from configuration.
    ///
    /// TLS material is loaded here, once; failures are fatal.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DnsError> {
        config.validate()?;
        let material = TlsMaterial::load(config)?;

        let mut builder = Client::builder()
            .use_rustls_tls()
            .https_only(true)
            .tls_built_in_root_certs(false)
            .identity(material.identity)
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(config.keepalive())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        for root in material.roots {
            builder = builder.add_root_certificate(root);
        }
        let http = builder.build()?;

        let base = registration_base(&config.sdc_host, config.sdc_port, &config.api_version)?;
        debug!(base = %base, "discovery client ready");
        Ok(Self { http, base })
    }

    /// Use an existing HTTP client against `base`, which must end in
    /// `/registration`.
    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    /// Registration URL for `name`. The name is one path segment, trailing dot included.
    pub fn registration_url(&self, name: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name);
        }
        url
    }
}

#[async_trait]
impl Discover for DiscoveryClient {
    async fn discover(&self, name: &str) -> Result<Vec<String>, DiscoveryError> {
        let url = self.registration_url(name);
        trace!(url = %url, "querying registry");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Transport {
                name: name.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                name: name.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| DiscoveryError::Transport {
                name: name.to_string(),
                source,
            })?;
        let registration: Registration =
            serde_json::from_slice(&body).map_err(|source| DiscoveryError::Decode {
                name: name.to_string(),
                source,
            })?;

        let addresses = registration.into_addresses();
        debug!(name, count = addresses.len(), "registry lookup complete");
        Ok(addresses)
    }
}
