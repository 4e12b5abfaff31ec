//! Table definitions for the persisted state layout (spec.md §6).
//! Primary keys and unique constraints mirror the entity invariants
//! in spec.md §3 directly — `(decision_id, signer_id)` uniqueness and
//! the monotonic `sequence_number` on `audit_log` are the anti-race
//! mechanisms spec.md §5 calls authoritative.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id         TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    role            TEXT NOT NULL,
    current_key_id  TEXT NOT NULL,
    passphrase_hash TEXT NOT NULL,
    status          TEXT NOT NULL,
    last_login_at   TEXT
);

CREATE TABLE IF NOT EXISTS user_key_history (
    key_id            TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    public_key        TEXT NOT NULL,
    status            TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    rotated_to_key_id TEXT,
    revoked_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_key_history_user ON user_key_history(user_id);

CREATE TABLE IF NOT EXISTS sessions (
    session_id       TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    token_hash       TEXT NOT NULL UNIQUE,
    created_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    revoked_at       TEXT,
    last_activity_at TEXT NOT NULL,
    source_addr      TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

CREATE TABLE IF NOT EXISTS decisions (
    decision_id             TEXT PRIMARY KEY,
    incident_id             TEXT NOT NULL,
    playbook_id             TEXT NOT NULL,
    step_id                 TEXT,
    action_type             TEXT NOT NULL,
    scope_json              TEXT NOT NULL,
    status                  TEXT NOT NULL,
    threshold               INTEGER NOT NULL,
    required                INTEGER NOT NULL,
    signers_json            TEXT NOT NULL,
    created_at              TEXT NOT NULL,
    authorized_at           TEXT,
    previous_decision_hash  TEXT
);
CREATE INDEX IF NOT EXISTS idx_decisions_incident ON decisions(incident_id);

CREATE TABLE IF NOT EXISTS decision_signatures (
    decision_id TEXT NOT NULL,
    signer_id   TEXT NOT NULL,
    signature   TEXT NOT NULL,
    key_id      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (decision_id, signer_id)
);

CREATE TABLE IF NOT EXISTS audit_log (
    sequence_number INTEGER PRIMARY KEY,
    ts              TEXT NOT NULL,
    event_type      TEXT NOT NULL,
    payload_json    TEXT NOT NULL,
    prev_hash       TEXT,
    entry_hash      TEXT NOT NULL,
    signer_id       TEXT,
    signature       TEXT,
    key_id          TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_log(event_type);
CREATE INDEX IF NOT EXISTS idx_audit_signer ON audit_log(signer_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_head_hash  TEXT NOT NULL,
    ts               TEXT NOT NULL,
    sequence_number  INTEGER NOT NULL,
    checkpoint_hash  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS handshake_packets (
    packet_id              TEXT PRIMARY KEY,
    decision_id            TEXT NOT NULL,
    namespace              TEXT NOT NULL,
    previous_receipt_hash  TEXT,
    packet_hash            TEXT NOT NULL,
    receipt_hash           TEXT NOT NULL,
    sequence_number        INTEGER NOT NULL,
    content_json           TEXT NOT NULL,
    created_at             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_packets_namespace ON handshake_packets(namespace, sequence_number);
"#;
