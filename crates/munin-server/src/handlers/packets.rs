//! `POST /packets`, `GET /packets/{id}`, `GET /packets/merkle-root`
//! (spec.md §6; the latter two are the supplemented read paths for
//! SPEC_FULL.md §E.2/§E.3).

use crate::authz;
use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use munin_auth::Session;
use munin_canon::JsonValue;
use munin_packets::{Packet, GLOBAL_NAMESPACE};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct IssuePacketRequest {
    pub decision_id: String,
    pub body: serde_json::Value,
    pub namespace: Option<String>,
}

#[derive(Serialize)]
pub struct PacketView {
    pub packet_id: String,
    pub decision_id: String,
    pub namespace: String,
    pub previous_receipt_hash: Option<String>,
    pub packet_hash: String,
    pub receipt_hash: String,
    pub sequence_number: i64,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<Packet> for PacketView {
    fn from(p: Packet) -> Self {
        PacketView {
            packet_id: p.packet_id,
            decision_id: p.decision_id,
            namespace: p.namespace,
            previous_receipt_hash: p.previous_receipt_hash,
            packet_hash: p.packet_hash,
            receipt_hash: p.receipt_hash,
            sequence_number: p.sequence_number,
            content: p.content.into(),
            created_at: p.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct PacketResponse {
    pub packet: PacketView,
}

pub async fn issue_packet(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<IssuePacketRequest>,
) -> Result<Json<PacketResponse>, ApiError> {
    authz::require(&state, &session, "packets", "authorize")?;

    let content: JsonValue = body.body.try_into()?;
    let packet = state
        .packets
        .issue_packet(&body.decision_id, body.namespace.as_deref(), content)?;

    Ok(Json(PacketResponse {
        packet: packet.into(),
    }))
}

pub async fn get_packet(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(packet_id): Path<String>,
) -> Result<Json<PacketResponse>, ApiError> {
    authz::require(&state, &session, "packets", "view")?;
    let packet = state.packets.get_packet(&packet_id)?;
    Ok(Json(PacketResponse {
        packet: packet.into(),
    }))
}

#[derive(Deserialize, Default)]
pub struct MerkleRootQuery {
    pub namespace: Option<String>,
    pub up_to_seq: Option<i64>,
}

#[derive(Serialize)]
pub struct MerkleRootResponse {
    pub namespace: String,
    pub sovereign_hash: Option<String>,
}

pub async fn merkle_root(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<MerkleRootQuery>,
) -> Result<Json<MerkleRootResponse>, ApiError> {
    authz::require(&state, &session, "packets", "view")?;
    let namespace = q.namespace.unwrap_or_else(|| GLOBAL_NAMESPACE.to_string());
    let sovereign_hash = state.packets.merkle_root(&namespace, q.up_to_seq)?;
    Ok(Json(MerkleRootResponse {
        namespace,
        sovereign_hash,
    }))
}
