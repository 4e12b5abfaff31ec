use chrono::{DateTime, Utc};
use munin_canon::JsonValue;

/// One immutable, hash-chained record of a state change (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub sequence_number: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub payload: JsonValue,
    /// The exact canonical-JSON bytes used to compute `entry_hash` —
    /// re-serializing `payload` on read is forbidden (spec.md §6);
    /// callers that need the payload back verbatim should use this,
    /// not re-encode `payload`.
    pub canonical_payload: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signer_id: Option<String>,
    pub signature: Option<String>,
    pub key_id: Option<String>,
}

/// A published snapshot of the audit head (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub chain_head_hash: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: i64,
    pub checkpoint_hash: String,
}

/// Result of `verify_chain` (spec.md §4.4). Verification never
/// mutates state, and it never stops at the first error — every
/// entry in range is checked so a single `verify_chain` call reports
/// the full extent of any corruption.
#[derive(Debug, Clone, Default)]
pub struct ChainVerification {
    pub valid: bool,
    pub errors: Vec<munin_error::Error>,
    pub entries_checked: i64,
}

/// Supplies the key material an already-signed audit entry should be
/// verified against, or (when writing) what a newly appended entry
/// should be signed with. Breaks the audit↔keys crate cycle
/// (spec.md §9 Design Notes, capability-set pattern) — `munin-keys`
/// implements this, `munin-audit` only depends on the trait.
pub trait KeyResolver: Send + Sync {
    /// Base64-encoded 32-byte Ed25519 public key for `key_id`, read
    /// from key *history* so a rotated/revoked key's past signatures
    /// remain verifiable forever (spec.md §4.3).
    fn resolve_public_key(&self, key_id: &str) -> munin_error::MuninResult<String>;
}

/// Optional signer context for `append` when the caller wants the
/// new entry itself signed (distinct from e.g. a decision signature
/// that simply lives inside the entry's `payload`).
pub struct EntrySigner<'a> {
    pub signer_id: String,
    pub key_id: String,
    pub sign: &'a dyn Fn(&[u8]) -> Vec<u8>,
}

/// Query filters for listing entries (spec.md §6, `GET /audit`).
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub signer_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditQuery {
    pub const MAX_LIMIT: i64 = 1000;
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn normalized(mut self) -> Self {
        if self.limit <= 0 {
            self.limit = Self::DEFAULT_LIMIT;
        }
        if self.limit > Self::MAX_LIMIT {
            self.limit = Self::MAX_LIMIT;
        }
        if self.offset < 0 {
            self.offset = 0;
        }
        self
    }
}
