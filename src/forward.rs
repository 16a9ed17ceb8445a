//! Terminal handler that relays deferred queries to upstream resolvers.
//!
//! UDP first, one upstream at a time in configuration order. A truncated UDP
//! reply is retried over TCP against the same upstream. The first upstream
//! that answers wins; its reply is written back with the client's message id.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::chain::{Handler, QueryContext, ResponseWriter};
use crate::error::HandlerError;
use crate::metrics;

/// Maximum UDP DNS response size with EDNS(0).
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

/// Time given to a single upstream before moving to the next one.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Name of this stage in logs.
pub const HANDLER_NAME: &str = "forward";

/// Relays queries to upstream resolvers over UDP, falling back to TCP on truncation.
#[derive(Debug, Clone)]
pub struct Forward {
    upstreams: Vec<SocketAddr>,
    attempt_timeout: Duration,
}

impl Forward {
    /// Forward to `upstreams`, tried in order.
    pub fn new(upstreams: Vec<SocketAddr>) -> Self {
        Self {
            upstreams,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Override the per-upstream timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    fn upstream_query(ctx: &QueryContext) -> Message {
        let mut msg = Message::new();
        msg.set_id(ctx.header().id())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_checking_disabled(ctx.header().checking_disabled());
        msg.add_query(ctx.query().clone());
        msg
    }
}

fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn accept(upstream: SocketAddr, reply: &Message, id: u16) -> bool {
    if reply.id() == id && reply.message_type() == MessageType::Response {
        return true;
    }
    debug!(%upstream, expected = id, received = reply.id(), "ignoring unexpected upstream reply");
    false
}

/// One UDP query/response exchange with `upstream`. Replies with a foreign id are skipped.
async fn exchange_udp(upstream: SocketAddr, query: &[u8], id: u16) -> io::Result<Message> {
    let bind_addr: SocketAddr = if upstream.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(upstream).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
    loop {
        let len = socket.recv(&mut buf).await?;
        let reply = Message::from_vec(&buf[..len]).map_err(invalid_data)?;
        if accept(upstream, &reply, id) {
            return Ok(reply);
        }
    }
}

/// One length-prefixed TCP exchange with `upstream` (RFC 1035 4.2.2).
async fn exchange_tcp(upstream: SocketAddr, query: &[u8], id: u16) -> io::Result<Message> {
    let len = u16::try_from(query.len()).map_err(invalid_data)?;
    let mut stream = TcpStream::connect(upstream).await?;
    stream.set_nodelay(true)?;

    let mut framed = Vec::with_capacity(query.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);
    stream.write_all(&framed).await?;

    loop {
        let len = stream.read_u16().await?;
        let mut buf = vec![0u8; usize::from(len)];
        stream.read_exact(&mut buf).await?;
        let reply = Message::from_vec(&buf).map_err(invalid_data)?;
        if accept(upstream, &reply, id) {
            return Ok(reply);
        }
    }
}

/// Exchange over UDP, repeating over TCP when the UDP reply is truncated.
async fn exchange(upstream: SocketAddr, query: &[u8], id: u16) -> io::Result<Message> {
    let reply = exchange_udp(upstream, query, id).await?;
    if !reply.truncated() {
        return Ok(reply);
    }
    debug!(%upstream, "truncated UDP reply, retrying over TCP");
    exchange_tcp(upstream, query, id).await
}

#[async_trait]
impl Handler for Forward {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    async fn serve_dns(
        &self,
        ctx: &QueryContext,
        writer: &mut dyn ResponseWriter,
    ) -> Result<ResponseCode, HandlerError> {
        let query = Self::upstream_query(ctx);
        let id = query.id();
        let bytes = query.to_vec().map_err(|e| HandlerError::Upstream(e.to_string()))?;

        let mut last_error = String::from("no upstreams configured");
        for upstream in &self.upstreams {
            let attempt = tokio::time::timeout(self.attempt_timeout, exchange(*upstream, &bytes, id));
            let result = match ctx.bounded(attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(io::Error::new(io::ErrorKind::TimedOut, "attempt timed out")),
                Err(interrupted) => {
                    metrics::record_forward("interrupted");
                    return Err(HandlerError::Upstream(format!(
                        "{upstream}: {interrupted:?}"
                    )));
                }
            };

            match result {
                Ok(mut reply) => {
                    reply.set_id(ctx.header().id());
                    let code = reply.response_code();
                    debug!(
                        name = %ctx.name(),
                        %upstream,
                        code = ?code,
                        answers = reply.answers().len(),
                        "upstream answered"
                    );
                    writer.write_msg(reply).await?;
                    metrics::record_forward("ok");
                    return Ok(code);
                }
                Err(e) => {
                    warn!(name = %ctx.name(), %upstream, error = %e, "upstream exchange failed");
                    metrics::record_forward("error");
                    last_error = format!("{upstream}: {e}");
                }
            }
        }

        Err(HandlerError::Upstream(last_error))
    }
}
