use chrono::{DateTime, Utc};

/// A bearer-token session (spec.md §3). The raw token is never
/// stored — only `token_hash = HMAC-SHA-256(secret, raw_token)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub source_addr: Option<String>,
}

/// Returned by a successful `login` (spec.md §6 `POST /login`).
pub struct LoginSuccess {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub role: munin_keys::Role,
}

/// Configuration consulted by `login`/`validate_session` — owned by
/// `munin-server`'s `Config` and passed by reference (spec.md §9,
/// "the only mutable process-wide resources are the storage handle
/// and the audit-head lock" — everything else, including this, is
/// immutable for the process lifetime).
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub secret: Vec<u8>,
    pub ttl_hours: i64,
    pub login_attempt_window_minutes: i64,
    pub login_attempt_limit: i64,
}
