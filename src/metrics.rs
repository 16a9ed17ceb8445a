//! Metrics instrumentation for apps-dns.
//!
//! All metrics are prefixed with `apps_dns.`

use metrics::{counter, histogram};
use std::time::Instant;

/// Record a query handled by the service discovery stage.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::Deferred => "deferred",
        QueryResult::Ineligible => "ineligible",
        QueryResult::Failed => "failed",
    };

    counter!("apps_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("apps_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// How the service discovery stage disposed of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Answered from the registry.
    Answered,
    /// Registry had no matching address; passed down the chain.
    Deferred,
    /// Not an IN A/AAAA question; passed down the chain.
    Ineligible,
    /// Registry call failed; SERVFAIL.
    Failed,
}

/// Record the duration of one registry round-trip.
pub fn record_discovery(outcome: &'static str, duration: std::time::Duration) {
    histogram!("apps_dns.discovery.duration.seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a failed registry call by error kind.
pub fn record_discovery_error(kind: &'static str) {
    counter!("apps_dns.discovery.error.count", "kind" => kind).increment(1);
}

/// Record records synthesized for an answered query.
pub fn record_answers(count: usize) {
    histogram!("apps_dns.query.answers").record(count as f64);
}

/// Record a query relayed to an upstream resolver.
pub fn record_forward(result: &'static str) {
    counter!("apps_dns.forward.count", "result" => result).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
