//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::{ChainServer, Handler};
use crate::config::Config;
use crate::discovery::{Discover, DiscoveryClient};
use crate::error::DnsError;
use crate::forward::Forward;
use crate::svcdiscovery::ServiceDiscovery;

/// Assemble the handler chain: service discovery, then forwarding when
/// upstreams are configured.
pub fn build_chain(
    discovery: Arc<dyn Discover>,
    ttl: u32,
    upstreams: &[SocketAddr],
) -> Arc<dyn Handler> {
    let next: Option<Arc<dyn Handler>> = if upstreams.is_empty() {
        None
    } else {
        Some(Arc::new(Forward::new(upstreams.to_vec())))
    };
    Arc::new(ServiceDiscovery::new(discovery, ttl, next))
}

/// Serve `handler` on the given sockets until `shutdown` is cancelled or the
/// listeners fail.
pub async fn serve(
    handler: ChainServer,
    udp: UdpSocket,
    tcp: Option<(TcpListener, Duration)>,
    shutdown: CancellationToken,
) -> Result<(), DnsError> {
    let mut server = ServerFuture::new(handler);
    server.register_socket(udp);
    if let Some((listener, timeout)) = tcp {
        server.register_listener(listener, timeout);
    }

    let server_token = server.shutdown_token().clone();
    let mut server_task = tokio::spawn(async move { server.block_until_done().await });

    let finished = tokio::select! {
        _ = shutdown.cancelled() => {
            info!("DNS server shutdown requested");
            server_token.cancel();
            (&mut server_task).await
        }
        result = &mut server_task => result,
    };

    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("DNS server error: {}", e);
            Err(e.into())
        }
        Err(e) => Err(DnsError::Io(std::io::Error::other(e))),
    }
}

/// DNS server answering application hostnames from the discovery registry.
pub struct DnsServer {
    config: Config,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the DNS server until `shutdown` is cancelled.
    ///
    /// The discovery client and its TLS material are set up before any
    /// socket is bound; failures there abort startup.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let dns = &self.config.dns;
        let discovery = &self.config.svcdiscovery;
        info!(
            listen_addr = %dns.listen_addr,
            sdc_host = %discovery.sdc_host,
            sdc_port = discovery.sdc_port,
            upstreams = ?dns.upstreams,
            "Starting apps-dns server"
        );

        let client = DiscoveryClient::from_config(discovery)?;
        let chain = build_chain(Arc::new(client), discovery.ttl, &dns.upstreams);
        let handler = ChainServer::new(chain, dns.query_timeout(), shutdown.clone());

        let udp = UdpSocket::bind(dns.listen_addr).await?;
        info!(addr = %dns.listen_addr, "DNS UDP listening");

        let tcp = TcpListener::bind(dns.listen_addr).await?;
        info!(addr = %dns.listen_addr, "DNS TCP listening");

        info!("DNS server ready to serve queries");
        serve(handler, udp, Some((tcp, dns.tcp_timeout())), shutdown).await?;

        info!("DNS server stopped");
        Ok(())
    }
}
