//! Shared test infrastructure for handler chain integration tests.

#![allow(dead_code)]

pub mod pki;

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio_util::sync::CancellationToken;

use apps_dns::chain::{ChainServer, Handler, QueryContext, ResponseWriter};
use apps_dns::discovery::Discover;
use apps_dns::error::{DiscoveryError, HandlerError};
use apps_dns::svcdiscovery::ServiceDiscovery;

// --- Constants ---

pub const TTL: u32 = 300;
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, which can then be parsed with
/// `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
    sends: Arc<Mutex<usize>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
            sends: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of responses sent through this handle.
    pub fn sends(&self) -> usize {
        *self.sends.lock().unwrap()
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        *self.sends.lock().unwrap() += 1;
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(io::Error::other)?;
        Ok(info)
    }
}

// --- Fake registry ---

/// Scripted registry reply for one name.
#[derive(Clone, Debug)]
pub enum Reply {
    Hosts(Vec<String>),
    Status(u16),
    Hang,
}

impl Reply {
    pub fn hosts(hosts: &[&str]) -> Self {
        Reply::Hosts(hosts.iter().map(|h| h.to_string()).collect())
    }
}

/// In-memory `Discover` that answers from a script and records every lookup.
/// Names without a script have no registrations.
#[derive(Default)]
pub struct FakeDiscovery {
    replies: HashMap<String, Reply>,
    lookups: Mutex<Vec<String>>,
}

impl FakeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, reply: Reply) -> Self {
        self.replies.insert(name.to_string(), reply);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Discover for FakeDiscovery {
    async fn discover(&self, name: &str) -> Result<Vec<String>, DiscoveryError> {
        self.lookups.lock().unwrap().push(name.to_string());
        match self.replies.get(name) {
            Some(Reply::Hosts(hosts)) => Ok(hosts.clone()),
            Some(Reply::Status(code)) => Err(DiscoveryError::Status {
                name: name.to_string(),
                status: reqwest::StatusCode::from_u16(*code).unwrap(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
            None => Ok(vec![]),
        }
    }
}

// --- Recording next handler ---

/// What the next handler does with a query.
#[derive(Clone, Debug)]
pub enum NextBehavior {
    /// Return the code without writing.
    Code(ResponseCode),
    /// Write a non-authoritative A answer and return NOERROR.
    Answer(Ipv4Addr),
}

/// Next stage that records the contexts it receives.
pub struct RecordingNext {
    behavior: NextBehavior,
    seen: Mutex<Vec<(Name, RecordType, DNSClass, u16)>>,
}

impl RecordingNext {
    pub fn new(behavior: NextBehavior) -> Self {
        Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// (name, type, class, id) of every query delegated here.
    pub fn seen(&self) -> Vec<(Name, RecordType, DNSClass, u16)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Handler for RecordingNext {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn serve_dns(
        &self,
        ctx: &QueryContext,
        writer: &mut dyn ResponseWriter,
    ) -> Result<ResponseCode, HandlerError> {
        self.seen.lock().unwrap().push((
            ctx.name().clone(),
            ctx.query_type(),
            ctx.query_class(),
            ctx.header().id(),
        ));
        match &self.behavior {
            NextBehavior::Code(code) => Ok(*code),
            NextBehavior::Answer(ip) => {
                let mut msg = ctx.reply();
                msg.add_answer(Record::from_rdata(
                    ctx.name().clone(),
                    30,
                    RData::A((*ip).into()),
                ));
                writer.write_msg(msg).await?;
                Ok(ResponseCode::NoError)
            }
        }
    }
}

// --- Chain construction ---

/// Chain of `ServiceDiscovery` over `discovery`, followed by `next` if given.
pub fn build_chain_server(
    discovery: Arc<FakeDiscovery>,
    next: Option<Arc<RecordingNext>>,
) -> ChainServer {
    let next = next.map(|n| n as Arc<dyn Handler>);
    let head = Arc::new(ServiceDiscovery::new(discovery, TTL, next));
    ChainServer::new(head, QUERY_TIMEOUT, CancellationToken::new())
}

// --- Query/Request construction ---

pub fn client_src() -> SocketAddr {
    "10.0.0.1:12345".parse().unwrap()
}

/// Build wire-format bytes for a DNS query with the given questions.
pub fn build_message_bytes(queries: Vec<Query>, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    msg.add_queries(queries);
    msg.to_vec().unwrap()
}

pub fn question(name: &str, record_type: RecordType, class: DNSClass) -> Query {
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(class);
    query
}

/// Build wire-format bytes for a single-question IN query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_message_bytes(vec![question(name, record_type, DNSClass::IN)], id)
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

pub fn request_from_bytes(bytes: &[u8]) -> Request {
    Request::new(parse_message_request(bytes), client_src(), Protocol::Udp)
}

// --- Response helpers ---

/// Run raw request bytes through the chain and return the parsed response.
pub async fn execute_bytes(server: &ChainServer, bytes: &[u8]) -> (Message, usize) {
    let request = request_from_bytes(bytes);
    let handler = TestResponseHandler::new();
    server.handle_request(&request, handler.clone()).await;
    let sends = handler.sends();
    (handler.into_message(), sends)
}

/// Execute a single IN query through the chain and return the parsed response.
pub async fn execute_query(
    server: &ChainServer,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let (msg, sends) = execute_bytes(server, &build_query_bytes(name, record_type, id)).await;
    assert_eq!(sends, 1, "expected exactly one response");
    msg
}

/// Extract A addresses from a response, in order.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract AAAA addresses from a response, in order.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
