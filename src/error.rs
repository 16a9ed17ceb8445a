//! Error types for apps-dns.

use std::path::PathBuf;

use hickory_proto::op::ResponseCode;
use thiserror::Error;

/// Errors that can occur while starting or running the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// TLS material could not be read or parsed
    #[error("failed to load TLS material from {}: {reason}", path.display())]
    Tls {
        /// File that failed to load.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),
}

/// A single failed call to the service discovery registry.
///
/// Every variant is fatal to the query that triggered it; none of them mean
/// "not found". An empty host list is reported as `Ok(vec![])` instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Connection, TLS or body transfer failure.
    #[error("failed to discover service {name}: {source}")]
    Transport {
        /// Queried name.
        name: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// The registry answered with a non-success status.
    #[error("failed to discover service {name}: registry returned HTTP {status}")]
    Status {
        /// Queried name.
        name: String,
        /// Status returned by the registry.
        status: reqwest::StatusCode,
    },

    /// The registry body was not a registration document.
    #[error("failed to discover service {name}: malformed registration: {source}")]
    Decode {
        /// Queried name.
        name: String,
        /// JSON decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The query's time budget ran out before the registry answered.
    #[error("failed to discover service {name}: query deadline exceeded")]
    DeadlineExceeded {
        /// Queried name.
        name: String,
    },

    /// The query was cancelled (server shutting down).
    #[error("failed to discover service {name}: query cancelled")]
    Cancelled {
        /// Queried name.
        name: String,
    },
}

impl DiscoveryError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryError::Transport { .. } => "transport",
            DiscoveryError::Status { .. } => "status",
            DiscoveryError::Decode { .. } => "decode",
            DiscoveryError::DeadlineExceeded { .. } => "deadline",
            DiscoveryError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Errors returned by a handler in the DNS handler chain.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The discovery registry could not be consulted.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A handler deferred but nothing follows it in the chain.
    #[error("{0}: no next handler found")]
    NoNextHandler(&'static str),

    /// Every upstream resolver failed.
    #[error("upstream exchange failed: {0}")]
    Upstream(String),

    /// Writing the response back to the client failed.
    #[error("failed to write response: {0}")]
    Write(#[from] std::io::Error),
}

impl HandlerError {
    /// Response code reported to the client for this error.
    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::ServFail
    }
}
