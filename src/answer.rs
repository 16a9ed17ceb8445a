//! Answer synthesis from discovered addresses.
//!
//! The record family always follows the question, not the stored address:
//!
//! ```text
//! question  address            emitted
//! A         10.11.12.13        A     10.11.12.13
//! A         ::ffff:a0b:c0d     A     10.11.12.13
//! A         2001:db8::68       (omitted)
//! AAAA      2001:db8::68       AAAA  2001:db8::68
//! AAAA      10.11.12.13        AAAA  ::ffff:10.11.12.13
//! ```

use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::net::IpAddr;
use tracing::trace;

/// Coerce a discovered address into the rdata for `rtype`.
///
/// Returns `None` when the address has no representation of that width or
/// when `rtype` is not an address type.
fn coerce(addr: IpAddr, rtype: RecordType) -> Option<RData> {
    match (rtype, addr) {
        (RecordType::A, IpAddr::V4(v4)) => Some(RData::A(A(v4))),
        (RecordType::A, IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(|v4| RData::A(A(v4))),
        (RecordType::AAAA, IpAddr::V4(v4)) => Some(RData::AAAA(AAAA(v4.to_ipv6_mapped()))),
        (RecordType::AAAA, IpAddr::V6(v6)) => Some(RData::AAAA(AAAA(v6))),
        _ => None,
    }
}

/// Build the answer section for `name`/`rtype` from registry addresses.
///
/// Input order is preserved. Entries that do not parse, or that have no form
/// matching `rtype`, are dropped. An empty result means "no answer".
pub fn synthesize(name: &Name, rtype: RecordType, addresses: &[String], ttl: u32) -> Vec<Record> {
    addresses
        .iter()
        .filter_map(|raw| {
            let Ok(addr) = raw.parse::<IpAddr>() else {
                trace!(name = %name, address = %raw, "skipping unparseable address");
                return None;
            };
            let Some(rdata) = coerce(addr, rtype) else {
                trace!(name = %name, address = %addr, rtype = ?rtype, "no matching address form");
                return None;
            };
            let mut record = Record::from_rdata(name.clone(), ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            Some(record)
        })
        .collect()
}
