//! apps-dns - A DNS handler chain that answers application hostnames from a
//! service discovery registry.
//!
//! Every IN A/AAAA question is looked up in the registry over mutually
//! authenticated HTTPS. Registered addresses are answered authoritatively,
//! converted to the requested address family; names the registry does not
//! know are passed to the next handler, and registry failures are answered
//! with SERVFAIL.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            apps-dns                              │
//! │                                                                  │
//! │  UDP/TCP ──▶ ChainServer ──▶ ServiceDiscovery ──▶ Forward ──▶ upstream
//! │   :53            │                 │                             │
//! │                  │                 ▼                             │
//! │                  │        ┌──────────────────┐                   │
//! │                  │        │ DiscoveryClient  │── HTTPS/mTLS ──▶ registry
//! │                  │        └──────────────────┘                   │
//! │                  └── SERVFAIL / FORMERR when nothing was written │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Resolution
//!
//! ```text
//! web.apps.internal. IN A
//!   → GET /v1/registration/web.apps.internal.
//!   → {"hosts":[{"ip_address":"10.255.141.235"}]}
//!   → web.apps.internal. 60 IN A 10.255.141.235 (authoritative)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use apps_dns::{Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = config::Config::builder()
//!         .add_source(config::File::with_name("apps-dns.toml"))
//!         .build()
//!         .unwrap()
//!         .try_deserialize()
//!         .unwrap();
//!
//!     let shutdown = CancellationToken::new();
//!     DnsServer::new(config).run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod admission;
pub mod answer;
pub mod chain;
pub mod config;
pub mod discovery;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod resolvwriter;
pub mod server;
pub mod svcdiscovery;
pub mod telemetry;
pub mod tls;

// Re-export main types
pub use chain::{ChainServer, Handler, QueryContext, ResponseWriter};
pub use config::{Config, DiscoveryConfig, DnsConfig, TelemetryConfig};
pub use discovery::{Discover, DiscoveryClient};
pub use error::{DiscoveryError, DnsError, HandlerError};
pub use server::DnsServer;
pub use svcdiscovery::ServiceDiscovery;
