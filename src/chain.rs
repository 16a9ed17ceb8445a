//! DNS handler chain.
//!
//! Each stage implements [`Handler`] and holds at most one next stage, fixed
//! at construction. A stage either writes a response through the
//! [`ResponseWriter`] and returns its code, or passes the same
//! [`QueryContext`] and writer to the next stage untouched.
//!
//! ```text
//! UDP/TCP ─▶ ChainServer ─▶ ServiceDiscovery ─▶ Forward ─▶ upstream
//!               │                  │
//!               │                  └─▶ registry (HTTPS, mTLS)
//!               └─ writes an error response if the chain did not
//! ```

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::xfer::Protocol;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::HandlerError;

/// Query timeout used when a context is built without one.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a bounded operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The query's deadline passed.
    DeadlineExceeded,
    /// The query was cancelled.
    Cancelled,
}

/// Everything a handler knows about one inbound question.
///
/// Built once per request and only ever shared by reference.
#[derive(Debug, Clone)]
pub struct QueryContext {
    header: Header,
    query: Query,
    src: SocketAddr,
    protocol: Protocol,
    deadline: Instant,
    cancel: CancellationToken,
}

impl QueryContext {
    /// Create a context with the default time budget and its own cancellation token.
    pub fn new(header: Header, query: Query, src: SocketAddr, protocol: Protocol) -> Self {
        Self {
            header,
            query,
            src,
            protocol,
            deadline: Instant::now() + DEFAULT_QUERY_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the time budget, measured from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Tie the query to an external cancellation signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Request header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The question being answered.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Queried name, exactly as received.
    pub fn name(&self) -> &Name {
        self.query.name()
    }

    /// Queried record type.
    pub fn query_type(&self) -> RecordType {
        self.query.query_type()
    }

    /// Queried class.
    pub fn query_class(&self) -> DNSClass {
        self.query.query_class()
    }

    /// Client address.
    pub fn src(&self) -> SocketAddr {
        self.src
    }

    /// Transport the query arrived on.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Run `fut` until it completes, the deadline passes or the query is cancelled.
    pub async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| Interrupted::DeadlineExceeded)
            }
        }
    }

    /// Empty reply to this query: same id, opcode and flags, question echoed.
    pub fn reply(&self) -> Message {
        let mut msg = Message::new();
        msg.set_id(self.header.id())
            .set_message_type(MessageType::Response)
            .set_op_code(self.header.op_code())
            .set_recursion_desired(self.header.recursion_desired())
            .set_checking_disabled(self.header.checking_disabled());
        msg.add_query(self.query.clone());
        msg
    }
}

/// Destination for the single response to a query.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Send `msg` to the client. A second write for the same query fails.
    async fn write_msg(&mut self, msg: Message) -> io::Result<()>;
}

/// One stage of the handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stage name used in logs.
    fn name(&self) -> &'static str;

    /// Serve the query, either by writing a response or by handing off to
    /// the next stage. Returns the response code of whoever handled it.
    async fn serve_dns(
        &self,
        ctx: &QueryContext,
        writer: &mut dyn ResponseWriter,
    ) -> Result<ResponseCode, HandlerError>;
}

/// Delegate to `next`, or fail when the chain ends here.
pub async fn next_or_failure(
    name: &'static str,
    next: Option<&Arc<dyn Handler>>,
    ctx: &QueryContext,
    writer: &mut dyn ResponseWriter,
) -> Result<ResponseCode, HandlerError> {
    match next {
        Some(next) => next.serve_dns(ctx, writer).await,
        None => Err(HandlerError::NoNextHandler(name)),
    }
}

/// Writer over a hickory response handle.
struct WireWriter<'q, R> {
    request: &'q Request,
    handle: R,
    sent: Option<ResponseInfo>,
}

impl<'q, R: ResponseHandler> WireWriter<'q, R> {
    fn new(request: &'q Request, handle: R) -> Self {
        Self {
            request,
            handle,
            sent: None,
        }
    }

    async fn send_error(&mut self, request_header: &Header, code: ResponseCode) -> ResponseInfo {
        let response =
            MessageResponseBuilder::from_message_request(self.request).error_msg(request_header, code);
        match self.handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, code = ?code, "failed to send error response");
                let mut header = Header::response_from_request(request_header);
                header.set_response_code(code);
                ResponseInfo::from(header)
            }
        }
    }
}

#[async_trait]
impl<'q, R: ResponseHandler> ResponseWriter for WireWriter<'q, R> {
    async fn write_msg(&mut self, msg: Message) -> io::Result<()> {
        if self.sent.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "response already written",
            ));
        }
        let response = MessageResponseBuilder::from_message_request(self.request).build(
            *msg.header(),
            msg.answers().iter(),
            msg.name_servers().iter(),
            std::iter::empty(),
            msg.additionals().iter(),
        );
        let info = self.handle.send_response(response).await?;
        self.sent = Some(info);
        Ok(())
    }
}

/// Adapter that serves a handler chain from a hickory `ServerFuture`.
pub struct ChainServer {
    head: Arc<dyn Handler>,
    query_timeout: Duration,
    shutdown: CancellationToken,
}

impl ChainServer {
    /// Serve queries through `head`, giving each one `query_timeout`.
    /// Cancelling `shutdown` cancels every in-flight query.
    pub fn new(head: Arc<dyn Handler>, query_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            head,
            query_timeout,
            shutdown,
        }
    }
}

#[async_trait]
impl RequestHandler for ChainServer {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let mut writer = WireWriter::new(request, response_handle);

        let info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, src = %request.src(), "rejecting request without a single question");
                return writer.send_error(request.header(), ResponseCode::FormErr).await;
            }
        };

        let ctx = QueryContext::new(
            *info.header,
            info.query.original().clone(),
            info.src,
            info.protocol,
        )
        .with_timeout(self.query_timeout)
        .with_cancellation(self.shutdown.child_token());

        let outcome = self.head.serve_dns(&ctx, &mut writer).await;

        if let Some(sent) = writer.sent.take() {
            if let Err(e) = outcome {
                warn!(name = %ctx.name(), error = %e, "handler failed after writing a response");
            }
            return sent;
        }

        let code = match outcome {
            Ok(ResponseCode::NoError) => {
                warn!(name = %ctx.name(), "handler chain returned success without writing");
                ResponseCode::ServFail
            }
            Ok(code) => code,
            Err(e) => {
                error!(
                    name = %ctx.name(),
                    rtype = ?ctx.query_type(),
                    src = %ctx.src(),
                    protocol = ?ctx.protocol(),
                    handler = self.head.name(),
                    error = %e,
                    "handler chain failed"
                );
                e.response_code()
            }
        };
        writer.send_error(info.header, code).await
    }
}
