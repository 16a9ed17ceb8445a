//! Service discovery stage of the handler chain.
//!
//! ```text
//! NotAdmitted ─────────────────────────────────────────▶ Deferring
//! Admitted ─▶ Discovering ─┬─ error ──────────────────▶ Failed (SERVFAIL)
//!                          └─▶ Synthesizing ─┬─ records ─▶ Answered
//!                                            └─ none ────▶ Deferring
//! ```
//!
//! Only `Answered` writes anything. `Deferring` hands the untouched context
//! and writer to the next stage; `Failed` writes nothing and lets the chain
//! server report SERVFAIL without consulting the next stage.

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::Record;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::admission;
use crate::answer;
use crate::chain::{next_or_failure, Handler, Interrupted, QueryContext, ResponseWriter};
use crate::discovery::Discover;
use crate::error::{DiscoveryError, HandlerError};
use crate::metrics::{self, QueryResult, Timer};

/// Name of this stage in logs.
pub const HANDLER_NAME: &str = "svcdiscovery";

/// Where a query ended up after consulting the registry.
#[derive(Debug)]
pub enum Resolution {
    /// Not an IN A/AAAA question.
    NotAdmitted,
    /// The registry had nothing usable for the requested family.
    NoAnswer,
    /// Records to answer with, in registry order.
    Answered(Vec<Record>),
    /// The registry could not be consulted.
    Failed(DiscoveryError),
}

/// Answers application hostnames from the discovery registry and defers
/// everything else.
pub struct ServiceDiscovery {
    discovery: Arc<dyn Discover>,
    ttl: u32,
    next: Option<Arc<dyn Handler>>,
}

impl ServiceDiscovery {
    /// Create the stage. `ttl` is stamped on every synthesized record.
    pub fn new(discovery: Arc<dyn Discover>, ttl: u32, next: Option<Arc<dyn Handler>>) -> Self {
        Self {
            discovery,
            ttl,
            next,
        }
    }

    /// Run admission, discovery and synthesis for `ctx` without writing anything.
    pub async fn resolve(&self, ctx: &QueryContext) -> Resolution {
        if !admission::is_eligible(ctx.query_class(), ctx.query_type()) {
            return Resolution::NotAdmitted;
        }

        let name = ctx.name().to_ascii();
        let timer = Timer::start();
        let outcome = ctx.bounded(self.discovery.discover(&name)).await;
        let discovered = match outcome {
            Ok(result) => result,
            Err(Interrupted::DeadlineExceeded) => Err(DiscoveryError::DeadlineExceeded { name }),
            Err(Interrupted::Cancelled) => Err(DiscoveryError::Cancelled { name }),
        };

        let addresses = match discovered {
            Ok(addresses) => {
                metrics::record_discovery("ok", timer.elapsed());
                addresses
            }
            Err(e) => {
                metrics::record_discovery("error", timer.elapsed());
                metrics::record_discovery_error(e.kind());
                return Resolution::Failed(e);
            }
        };

        let records = answer::synthesize(ctx.name(), ctx.query_type(), &addresses, self.ttl);
        if records.is_empty() {
            debug!(
                name = %ctx.name(),
                rtype = ?ctx.query_type(),
                discovered = addresses.len(),
                "no registry address for requested family"
            );
            Resolution::NoAnswer
        } else {
            Resolution::Answered(records)
        }
    }

    fn respond(ctx: &QueryContext, records: Vec<Record>) -> Message {
        let mut msg = ctx.reply();
        msg.set_authoritative(true);
        msg.set_response_code(ResponseCode::NoError);
        msg.add_answers(records);
        msg
    }
}

#[async_trait]
impl Handler for ServiceDiscovery {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    async fn serve_dns(
        &self,
        ctx: &QueryContext,
        writer: &mut dyn ResponseWriter,
    ) -> Result<ResponseCode, HandlerError> {
        let timer = Timer::start();
        let rtype_str = format!("{:?}", ctx.query_type());

        match self.resolve(ctx).await {
            Resolution::NotAdmitted => {
                trace!(name = %ctx.name(), rtype = ?ctx.query_type(), class = ?ctx.query_class(), "not admitted");
                metrics::record_query(&rtype_str, QueryResult::Ineligible, timer.elapsed());
                next_or_failure(HANDLER_NAME, self.next.as_ref(), ctx, writer).await
            }
            Resolution::NoAnswer => {
                metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
                next_or_failure(HANDLER_NAME, self.next.as_ref(), ctx, writer).await
            }
            Resolution::Answered(records) => {
                debug!(name = %ctx.name(), answers = ?records, "answering from registry");
                metrics::record_answers(records.len());
                writer.write_msg(Self::respond(ctx, records)).await?;
                metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
                Ok(ResponseCode::NoError)
            }
            Resolution::Failed(e) => {
                error!(name = %ctx.name(), rtype = ?ctx.query_type(), src = %ctx.src(), error = %e, "service discovery failed");
                metrics::record_query(&rtype_str, QueryResult::Failed, timer.elapsed());
                Err(e.into())
            }
        }
    }
}
