//! `POST /decisions`, `POST /decisions/{id}/sign`,
//! `POST /decisions/{id}/reject`, `GET /decisions/{id}` (spec.md §6).

use crate::authz;
use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use munin_auth::Session;
use munin_canon::JsonValue;
use munin_decisions::{Decision, DecisionPolicy, DecisionSignature, DecisionView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct PolicyRequest {
    pub threshold: u32,
    pub required: u32,
    pub signers: Vec<String>,
}

#[derive(Deserialize)]
pub struct CreateDecisionRequest {
    pub incident_id: String,
    pub playbook_id: String,
    pub step_id: Option<String>,
    pub action_type: String,
    pub scope: serde_json::Value,
    pub policy: PolicyRequest,
    pub previous_decision_hash: Option<String>,
}

#[derive(Serialize)]
pub struct PolicyView {
    pub threshold: u32,
    pub required: u32,
    pub signers: Vec<String>,
}

#[derive(Serialize)]
pub struct DecisionSummary {
    pub decision_id: String,
    pub incident_id: String,
    pub playbook_id: String,
    pub step_id: Option<String>,
    pub action_type: String,
    pub scope: serde_json::Value,
    pub status: String,
    pub policy: PolicyView,
    pub created_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub previous_decision_hash: Option<String>,
}

impl From<Decision> for DecisionSummary {
    fn from(d: Decision) -> Self {
        DecisionSummary {
            decision_id: d.decision_id,
            incident_id: d.incident_id,
            playbook_id: d.playbook_id,
            step_id: d.step_id,
            action_type: d.action_type,
            scope: d.scope.into(),
            status: d.status.as_str().to_string(),
            policy: PolicyView {
                threshold: d.policy.threshold,
                required: d.policy.required,
                signers: d.policy.signers,
            },
            created_at: d.created_at,
            authorized_at: d.authorized_at,
            previous_decision_hash: d.previous_decision_hash,
        }
    }
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub decision: DecisionSummary,
}

pub async fn create_decision(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<CreateDecisionRequest>,
) -> Result<Json<DecisionResponse>, ApiError> {
    authz::require(&state, &session, "decisions", "create")?;

    let scope: JsonValue = body.scope.try_into()?;
    let decision_id = Uuid::new_v4().to_string();
    let policy = DecisionPolicy {
        threshold: body.policy.threshold,
        required: body.policy.required,
        signers: body.policy.signers,
    };

    let decision = state.decisions.create_decision(
        &decision_id,
        &body.incident_id,
        &body.playbook_id,
        body.step_id.as_deref(),
        &body.action_type,
        scope,
        policy,
        body.previous_decision_hash.as_deref(),
    )?;

    Ok(Json(DecisionResponse {
        decision: decision.into(),
    }))
}

#[derive(Deserialize)]
pub struct SignDecisionRequest {
    pub signer_id: String,
    pub signature: String,
    pub key_id: String,
    pub action_type: String,
    pub scope: serde_json::Value,
}

pub async fn sign_decision(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(decision_id): Path<String>,
    Json(body): Json<SignDecisionRequest>,
) -> Result<Json<DecisionResponse>, ApiError> {
    authz::require(&state, &session, "decisions", "sign")?;

    let scope: JsonValue = body.scope.try_into()?;
    let decision = state.decisions.submit_signature(
        &decision_id,
        &body.signer_id,
        &body.signature,
        &body.key_id,
        &body.action_type,
        &scope,
    )?;

    Ok(Json(DecisionResponse {
        decision: decision.into(),
    }))
}

pub async fn reject_decision(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(decision_id): Path<String>,
) -> Result<Json<DecisionResponse>, ApiError> {
    authz::require(&state, &session, "decisions", "reject")?;
    let decision = state.decisions.reject_decision(&decision_id)?;
    Ok(Json(DecisionResponse {
        decision: decision.into(),
    }))
}

#[derive(Serialize)]
pub struct SignatureView {
    pub signer_id: String,
    pub key_id: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl From<DecisionSignature> for SignatureView {
    fn from(s: DecisionSignature) -> Self {
        SignatureView {
            signer_id: s.signer_id,
            key_id: s.key_id,
            signature: s.signature,
            created_at: s.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct DecisionWithSignatures {
    #[serde(flatten)]
    pub summary: DecisionSummary,
    pub signatures: Vec<SignatureView>,
}

#[derive(Serialize)]
pub struct GetDecisionResponse {
    pub decision: DecisionWithSignatures,
}

impl From<DecisionView> for GetDecisionResponse {
    fn from(v: DecisionView) -> Self {
        GetDecisionResponse {
            decision: DecisionWithSignatures {
                summary: v.decision.into(),
                signatures: v.signatures.into_iter().map(SignatureView::from).collect(),
            },
        }
    }
}

pub async fn get_decision(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(decision_id): Path<String>,
) -> Result<Json<GetDecisionResponse>, ApiError> {
    authz::require(&state, &session, "decisions", "view")?;
    let view = state.decisions.get_decision(&decision_id)?;
    Ok(Json(view.into()))
}
