use chrono::{DateTime, Utc};
use munin_canon::JsonValue;

/// A handshake-packet receipt chained into the packet log (spec.md
/// §3, §4.7). The packet chain is a second, parallel hash chain over
/// authorized handshakes, distinct from the audit log's own chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_id: String,
    pub decision_id: String,
    pub namespace: String,
    pub previous_receipt_hash: Option<String>,
    pub packet_hash: String,
    pub receipt_hash: String,
    pub sequence_number: i64,
    pub content: JsonValue,
    pub created_at: DateTime<Utc>,
}
