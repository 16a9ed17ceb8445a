//! Mutual TLS material for the discovery client.
//!
//! The CA bundle, client certificate and client key are read once at startup.
//! Any failure here is fatal: the server never starts with a client that
//! cannot authenticate to the registry.

use reqwest::{Certificate, Identity};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::error::DnsError;

/// Parsed trust anchors and client identity.
pub struct TlsMaterial {
    /// Certificates that may sign the registry's server certificate.
    pub roots: Vec<Certificate>,
    /// Certificate chain and key presented to the registry.
    pub identity: Identity,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

fn read(path: &Path) -> Result<Vec<u8>, DnsError> {
    fs::read(path).map_err(|e| DnsError::Tls {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

impl TlsMaterial {
    /// Load the files named by the discovery configuration.
    pub fn load(config: &DiscoveryConfig) -> Result<Self, DnsError> {
        Self::from_files(
            &config.tls_ca_path,
            &config.tls_client_cert_path,
            &config.tls_client_key_path,
        )
    }

    /// Load a CA bundle plus a certificate/key pair, all PEM encoded.
    pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> Result<Self, DnsError> {
        let ca_pem = read(ca)?;
        let roots = Certificate::from_pem_bundle(&ca_pem).map_err(|e| DnsError::Tls {
            path: ca.to_path_buf(),
            reason: e.to_string(),
        })?;
        if roots.is_empty() {
            return Err(DnsError::Tls {
                path: ca.to_path_buf(),
                reason: "no certificates found".to_string(),
            });
        }

        let mut identity_pem = read(cert)?;
        if !identity_pem.ends_with(b"\n") {
            identity_pem.push(b'\n');
        }
        identity_pem.extend_from_slice(&read(key)?);
        let identity = Identity::from_pem(&identity_pem).map_err(|e| DnsError::Tls {
            path: cert.to_path_buf(),
            reason: format!("invalid certificate/key pair: {e}"),
        })?;

        debug!(
            ca = %ca.display(),
            cert = %cert.display(),
            roots = roots.len(),
            "loaded discovery TLS material"
        );

        Ok(Self { roots, identity })
    }
}
