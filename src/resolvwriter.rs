//! Bootstrap helper that renders a `resolv.conf` naming an upstream DNS host.
//!
//! The host is resolved through the system resolver configuration until it
//! exists, then written out as `nameserver` lines:
//!
//! ```text
//! nameserver 10.0.0.10
//! nameserver fd00::a
//! ```

use async_trait::async_trait;
use hickory_proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, TokioResolver};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// First retry delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
/// Upper bound on the retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Why a single lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveFailure {
    /// The name does not exist yet, or has no addresses.
    #[error("not found: {0}")]
    NotFound(String),
    /// Timeout or I/O trouble talking to the resolver.
    #[error("temporary failure: {0}")]
    Transient(String),
    /// Anything else.
    #[error("{0}")]
    Permanent(String),
}

impl ResolveFailure {
    /// Whether the lookup is worth repeating.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResolveFailure::Permanent(_))
    }
}

/// Errors that end a resolvwriter run.
#[derive(Debug, Error)]
pub enum ResolvWriterError {
    /// The system resolver could not be configured.
    #[error("failed to configure resolver: {0}")]
    Resolver(String),

    /// The host could not be resolved.
    #[error("failed to resolve {host:?}: {source}")]
    Resolve {
        /// Host being resolved.
        host: String,
        /// Last lookup failure.
        #[source]
        source: ResolveFailure,
    },

    /// Retries ran out before the host appeared.
    #[error("failed to resolve {host:?} after {attempts} attempts: {last}")]
    Exhausted {
        /// Host being resolved.
        host: String,
        /// Attempts made.
        attempts: u32,
        /// Last lookup failure.
        last: ResolveFailure,
    },

    /// The output file could not be written.
    #[error("failed to render {}: {source}", path.display())]
    Render {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Address lookup for a host name.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// All addresses of `host`, in resolver order.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure>;
}

/// Lookup through the system resolver configuration, without caching.
pub struct SystemLookup {
    resolver: TokioResolver,
}

impl SystemLookup {
    /// Build from `/etc/resolv.conf` (or the platform equivalent).
    pub fn from_system_config() -> Result<Self, ResolvWriterError> {
        let mut builder = TokioResolver::builder_tokio()
            .map_err(|e| ResolvWriterError::Resolver(e.to_string()))?;
        builder.options_mut().cache_size = 0;
        Ok(Self {
            resolver: builder.build(),
        })
    }
}

/// Sort a resolver error into retryable and fatal buckets.
pub fn classify(err: &ResolveError) -> ResolveFailure {
    if err.is_no_records_found() || err.is_nx_domain() {
        return ResolveFailure::NotFound(err.to_string());
    }
    match err.proto().map(|p| p.kind()) {
        Some(ProtoErrorKind::Timeout)
        | Some(ProtoErrorKind::Io(_))
        | Some(ProtoErrorKind::NoConnections)
        | Some(ProtoErrorKind::Busy) => ResolveFailure::Transient(err.to_string()),
        _ => ResolveFailure::Permanent(err.to_string()),
    }
}

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveFailure> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| classify(&e))?;
        let ips: Vec<IpAddr> = lookup.iter().collect();
        if ips.is_empty() {
            return Err(ResolveFailure::NotFound(format!("{host} has no addresses")));
        }
        Ok(ips)
    }
}

/// Exponential retry delay: doubles after every use, up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Start at `initial`, never exceed `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// Delay to wait now; the following one is twice as long.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Resolve `host`, retrying not-found and transient failures.
///
/// `max_attempts` of `None` retries until the host exists.
pub async fn resolve_with_retry(
    lookup: &dyn Lookup,
    host: &str,
    mut backoff: Backoff,
    max_attempts: Option<u32>,
) -> Result<Vec<IpAddr>, ResolvWriterError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match lookup.lookup(host).await {
            Ok(ips) => {
                info!(host, attempt, count = ips.len(), "resolved upstream DNS host");
                return Ok(ips);
            }
            Err(failure) if failure.is_retryable() => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(ResolvWriterError::Exhausted {
                        host: host.to_string(),
                        attempts: attempt,
                        last: failure,
                    });
                }
                let delay = backoff.next_delay();
                warn!(host, attempt, error = %failure, retry_in = ?delay, "lookup failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(failure) => {
                return Err(ResolvWriterError::Resolve {
                    host: host.to_string(),
                    source: failure,
                })
            }
        }
    }
}

fn render_err(path: &Path) -> impl FnOnce(io::Error) -> ResolvWriterError + '_ {
    move |source| ResolvWriterError::Render {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomically replace `out` with one `nameserver` line per address.
pub fn render(nameservers: &[IpAddr], out: &Path) -> Result<(), ResolvWriterError> {
    let dir = match out.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(render_err(out))?;
    for nameserver in nameservers {
        writeln!(file, "nameserver {nameserver}").map_err(render_err(out))?;
    }
    file.flush().map_err(render_err(out))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(render_err(out))?;
    }

    file.as_file().sync_all().map_err(render_err(out))?;
    file.persist(out).map_err(|e| render_err(out)(e.error))?;

    debug!(path = %out.display(), count = nameservers.len(), "rendered resolv.conf");
    Ok(())
}

/// Resolve `host` and write it to `out`.
pub async fn run(
    lookup: &dyn Lookup,
    host: &str,
    out: &Path,
    backoff: Backoff,
    max_attempts: Option<u32>,
) -> Result<Vec<IpAddr>, ResolvWriterError> {
    let ips = resolve_with_retry(lookup, host, backoff, max_attempts).await?;
    render(&ips, out)?;
    Ok(ips)
}
