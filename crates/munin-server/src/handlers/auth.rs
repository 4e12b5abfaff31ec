//! `POST /login`, `POST /logout` (spec.md §6).

use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub operator_id: String,
    pub passphrase: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub role: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let result = state
        .sessions
        .login(&body.operator_id, &body.passphrase, None)?;
    Ok(Json(LoginResponse {
        token: result.token,
        expires_at: result.expires_at,
        role: result.role.as_str().to_string(),
    }))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(munin_error::Error::AuthRequired)?;
    let raw_token = header.strip_prefix("Bearer ").unwrap_or(header);
    state.sessions.revoke_session(raw_token)?;
    Ok(Json(LogoutResponse { success: true }))
}
