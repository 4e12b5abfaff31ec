//! Bearer-token auth middleware (spec.md §6 "Authorization header").

use crate::error_response::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use munin_auth::Session;
use munin_error::Error;

/// Strips an optional `Bearer ` prefix, validates the token via
/// `SessionManager::validate_session`, and injects the resolved
/// `Session` into request extensions for downstream handlers. Routes
/// that don't run this layer (`/login`) never see a `Session`.
pub async fn auth_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::AuthRequired)?;

    let raw_token = header.strip_prefix("Bearer ").unwrap_or(header);
    let session: Session = state.sessions.validate_session(raw_token)?;
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}
