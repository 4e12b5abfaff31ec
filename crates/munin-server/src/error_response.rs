//! Maps the workspace's `Error` taxonomy onto HTTP status codes and a
//! wire error body (spec.md §7). This is the only place a `munin_error::Error`
//! becomes a status code; every other crate returns it untranslated.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use munin_error::Error;
use serde::Serialize;
use tracing::error;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    reason: String,
}

#[derive(Serialize)]
struct ErrorBodyWithField {
    error: &'static str,
    reason: String,
    field: &'static str,
}

/// Newtype so `munin_error::Error` (defined in a crate this binary
/// doesn't own) can implement `axum`'s `IntoResponse` here.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(&self.0);

        if matches!(self.0, Error::Internal(_) | Error::StorageFailure(_)) {
            error!(error = %self.0, "internal error surfaced to caller as a generic 500");
        }

        let reason = match &self.0 {
            Error::Internal(_) | Error::StorageFailure(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        if let Error::SessionInvalid { reason: why } = &self.0 {
            return (
                status,
                Json(ErrorBodyWithField {
                    error: kind,
                    reason: reason.clone(),
                    field: why,
                }),
            )
                .into_response();
        }

        (status, Json(ErrorBody { error: kind, reason })).into_response()
    }
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::InputInvalid(_) | Error::Encoding(_) => StatusCode::BAD_REQUEST,
        Error::AuthRequired => StatusCode::UNAUTHORIZED,
        Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
        Error::Locked => StatusCode::TOO_MANY_REQUESTS,
        Error::Disabled => StatusCode::UNAUTHORIZED,
        Error::SessionInvalid { .. } => StatusCode::UNAUTHORIZED,
        Error::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::WrongState(_) => StatusCode::BAD_REQUEST,
        Error::KeyNotActive { .. } => StatusCode::BAD_REQUEST,
        Error::UnknownSigner { .. } => StatusCode::BAD_REQUEST,
        Error::SignatureInvalid => StatusCode::BAD_REQUEST,
        Error::DecisionChainBroken { .. }
        | Error::PacketChainBroken { .. }
        | Error::AuditChainBroken { .. }
        | Error::HashMismatch { .. }
        | Error::AuditSignatureInvalid { .. }
        | Error::GenesisPrevHash => StatusCode::BAD_REQUEST,
        Error::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
