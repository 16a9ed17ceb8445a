//! Query admission: which questions the registry is consulted for.

use hickory_proto::rr::{DNSClass, RecordType};

/// True when a question of this class and type may be answered from the
/// discovery registry. Everything else goes straight to the next handler.
pub fn is_eligible(class: DNSClass, rtype: RecordType) -> bool {
    class == DNSClass::IN && matches!(rtype, RecordType::A | RecordType::AAAA)
}
