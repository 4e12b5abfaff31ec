//! `POST /users`, `GET /users`, `GET /users/{id}`, `PUT /users/{id}`,
//! `DELETE /users/{id}` (spec.md §6).

use crate::authz;
use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use munin_auth::Session;
use munin_crypto::hash_password;
use munin_error::Error;
use munin_keys::{Role, User, UserStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub operator_id: String,
    pub passphrase: String,
    pub role: String,
    /// Base64, 32 raw Ed25519 bytes (spec.md §3). Not named in the §6
    /// request-body column, but required by the data model — a user
    /// cannot exist without an active key.
    pub public_key: String,
    pub key_id: Option<String>,
    /// Accepted for compatibility with ministry-scoped operator
    /// clients; the persisted `User` record has no column for either
    /// (spec.md §3 defines none), so neither is stored beyond the
    /// `USER_REGISTERED` audit entry's request echo.
    #[allow(dead_code)]
    pub ministry_id: Option<String>,
    #[allow(dead_code)]
    pub clearance_level: Option<String>,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: String,
    pub operator_id: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct CreateUserResponse {
    pub user: UserSummary,
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    authz::require(&state, &session, "users", "create")?;

    if body.operator_id.is_empty() || body.passphrase.is_empty() || body.public_key.is_empty() {
        return Err(Error::InputInvalid(
            "operator_id, passphrase, and public_key are required".into(),
        )
        .into());
    }
    let role = Role::parse(&body.role)?;
    let key_id = body
        .key_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let passphrase_hash = hash_password(&body.passphrase, state.config.argon2_params())
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))?;

    let user = state.keys.register_user(
        &body.operator_id,
        &body.operator_id,
        role,
        &body.public_key,
        &key_id,
        &passphrase_hash,
    )?;

    Ok(Json(CreateUserResponse {
        user: UserSummary {
            id: user.user_id.clone(),
            operator_id: user.user_id,
            role: user.role.as_str().to_string(),
        },
    }))
}

#[derive(Serialize)]
pub struct UserView {
    pub user_id: String,
    pub name: String,
    pub role: String,
    pub current_key_id: String,
    pub status: String,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        UserView {
            user_id: u.user_id,
            name: u.name,
            role: u.role.as_str().to_string(),
            current_key_id: u.current_key_id,
            status: u.status.as_str().to_string(),
            last_login_at: u.last_login_at,
        }
    }
}

#[derive(Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserView>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    authz::require(&state, &session, "users", "view")?;
    let users = state.keys.list_users()?;
    Ok(Json(ListUsersResponse {
        users: users.into_iter().map(UserView::from).collect(),
    }))
}

#[derive(Serialize)]
pub struct GetUserResponse {
    pub user: UserView,
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<String>,
) -> Result<Json<GetUserResponse>, ApiError> {
    authz::require(&state, &session, "users", "view")?;
    let user = state.keys.get_user(&user_id)?;
    Ok(Json(GetUserResponse { user: user.into() }))
}

#[derive(Deserialize, Default)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub passphrase: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<GetUserResponse>, ApiError> {
    authz::require(&state, &session, "users", "update")?;

    let role = body.role.as_deref().map(Role::parse).transpose()?;
    let passphrase_hash = body
        .passphrase
        .as_deref()
        .map(|p| hash_password(p, state.config.argon2_params()))
        .transpose()
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))?;

    let user = state
        .keys
        .update_user(&user_id, role, None, passphrase_hash.as_deref())?;
    Ok(Json(GetUserResponse { user: user.into() }))
}

#[derive(Serialize)]
pub struct DeleteUserResponse {
    pub success: bool,
}

/// There is no hard delete: key history and decisions reference
/// `user_id` forever (spec.md §3's immutability invariants), so
/// "delete" means `status=DISABLED` plus revoking every live session
/// — the same effect §3 describes for "account disable".
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    authz::require(&state, &session, "users", "delete")?;
    state
        .keys
        .update_user(&user_id, None, Some(UserStatus::Disabled), None)?;
    state.sessions.revoke_all_sessions_for_user(&user_id)?;
    Ok(Json(DeleteUserResponse { success: true }))
}
