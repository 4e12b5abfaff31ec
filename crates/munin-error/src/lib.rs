//! Shared error taxonomy (spec.md §7) used by every other crate in the
//! workspace. The HTTP layer in `munin-server` is the only place that
//! maps this into status codes and wire bodies.

use thiserror::Error;

/// The one error type every component-level operation returns.
///
/// Variants intentionally carry just enough context to act on, never
/// enough to leak internals (a `SignatureInvalid` never says which
/// byte of the message diverged, a `StorageFailure` never repeats the
/// underlying driver's message to a caller outside the process).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("input invalid: {0}")]
    InputInvalid(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked until the rate-limit window elapses")]
    Locked,

    #[error("account disabled")]
    Disabled,

    #[error("session invalid: {reason}")]
    SessionInvalid { reason: &'static str },

    #[error("permission denied: {resource}/{action}")]
    PermissionDenied { resource: String, action: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("wrong state: {0}")]
    WrongState(String),

    #[error("key not active: {key_id}")]
    KeyNotActive { key_id: String },

    #[error("unknown signer: {signer_id}")]
    UnknownSigner { signer_id: String },

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("decision chain broken at decision {decision_id}")]
    DecisionChainBroken { decision_id: String },

    #[error("packet chain broken at packet {packet_id}")]
    PacketChainBroken { packet_id: String },

    #[error("audit chain broken at sequence {seq}")]
    AuditChainBroken { seq: i64 },

    #[error("hash mismatch at sequence {seq}: expected {expected}, got {got}")]
    HashMismatch {
        seq: i64,
        expected: String,
        got: String,
    },

    #[error("audit signature invalid at sequence {seq}")]
    AuditSignatureInvalid { seq: i64 },

    #[error("genesis entry must have a null prev_hash")]
    GenesisPrevHash,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("encoding failure: {0}")]
    Encoding(String),

    #[error("internal error")]
    Internal(String),
}

impl Error {
    /// A stable, machine-readable tag for the wire error body and for
    /// logging — never the `Display` text, which may vary.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InputInvalid(_) => "InputInvalid",
            Error::AuthRequired => "AuthRequired",
            Error::InvalidCredentials => "InvalidCredentials",
            Error::Locked => "Locked",
            Error::Disabled => "Disabled",
            Error::SessionInvalid { .. } => "SessionInvalid",
            Error::PermissionDenied { .. } => "PermissionDenied",
            Error::NotFound(_) => "NotFound",
            Error::Conflict(_) => "Conflict",
            Error::WrongState(_) => "WrongState",
            Error::KeyNotActive { .. } => "KeyNotActive",
            Error::UnknownSigner { .. } => "UnknownSigner",
            Error::SignatureInvalid => "SignatureInvalid",
            Error::DecisionChainBroken { .. } => "ChainBroken",
            Error::PacketChainBroken { .. } => "ChainBroken",
            Error::AuditChainBroken { .. } => "ChainBroken",
            Error::HashMismatch { .. } => "HashMismatch",
            Error::AuditSignatureInvalid { .. } => "AuditSignatureInvalid",
            Error::GenesisPrevHash => "GenesisPrevHash",
            Error::StorageFailure(_) => "StorageFailure",
            Error::Encoding(_) => "Encoding",
            Error::Internal(_) => "Internal",
        }
    }
}

pub type MuninResult<T> = Result<T, Error>;
