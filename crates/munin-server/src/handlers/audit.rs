//! `GET /audit`, `POST /audit/verify`, `POST /audit/checkpoint`
//! (spec.md §6).

use crate::authz;
use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use munin_audit::{AuditEntry, AuditQuery, Checkpoint};
use munin_auth::Session;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Default)]
pub struct AuditListQuery {
    pub event_type: Option<String>,
    pub signer_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditEntryView {
    pub sequence_number: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signer_id: Option<String>,
    pub signature: Option<String>,
    pub key_id: Option<String>,
}

impl From<AuditEntry> for AuditEntryView {
    fn from(e: AuditEntry) -> Self {
        AuditEntryView {
            sequence_number: e.sequence_number,
            ts: e.ts,
            event_type: e.event_type,
            payload: e.payload.into(),
            prev_hash: e.prev_hash,
            entry_hash: e.entry_hash,
            signer_id: e.signer_id,
            signature: e.signature,
            key_id: e.key_id,
        }
    }
}

#[derive(Serialize)]
pub struct ListAuditResponse {
    pub entries: Vec<AuditEntryView>,
}

pub async fn list_audit(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<AuditListQuery>,
) -> Result<Json<ListAuditResponse>, ApiError> {
    authz::require(&state, &session, "audit", "view")?;

    let query = AuditQuery {
        event_type: q.event_type,
        signer_id: q.signer_id,
        limit: q.limit.unwrap_or(0),
        offset: q.offset.unwrap_or(0),
    };
    let entries = state.audit.list(query)?;
    Ok(Json(ListAuditResponse {
        entries: entries.into_iter().map(AuditEntryView::from).collect(),
    }))
}

#[derive(Deserialize, Default)]
pub struct VerifyChainRequest {
    pub from_seq: Option<i64>,
    pub to_seq: Option<i64>,
}

#[derive(Serialize)]
pub struct VerifyChainResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub entries_checked: i64,
}

pub async fn verify_chain(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<VerifyChainRequest>,
) -> Result<Json<VerifyChainResponse>, ApiError> {
    authz::require(&state, &session, "audit", "view")?;

    let result = state
        .audit
        .verify_chain(body.from_seq, body.to_seq, state.keys.as_ref())?;

    Ok(Json(VerifyChainResponse {
        valid: result.valid,
        errors: result.errors.iter().map(|e| e.to_string()).collect(),
        entries_checked: result.entries_checked,
    }))
}

#[derive(Serialize)]
pub struct CheckpointView {
    pub chain_head_hash: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: i64,
    pub checkpoint_hash: String,
}

impl From<Checkpoint> for CheckpointView {
    fn from(c: Checkpoint) -> Self {
        CheckpointView {
            chain_head_hash: c.chain_head_hash,
            timestamp: c.timestamp,
            sequence_number: c.sequence_number,
            checkpoint_hash: c.checkpoint_hash,
        }
    }
}

#[derive(Serialize)]
pub struct CheckpointResponse {
    pub checkpoint: CheckpointView,
}

pub async fn export_checkpoint(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<CheckpointResponse>, ApiError> {
    authz::require(&state, &session, "audit", "view")?;
    let checkpoint = state.audit.export_checkpoint()?;
    Ok(Json(CheckpointResponse {
        checkpoint: checkpoint.into(),
    }))
}
