//! Assembles the `/login`, `/logout`, `/users`, `/decisions`,
//! `/audit`, `/packets` routes behind the bearer-auth middleware
//! (spec.md §6). Route grouping mirrors
//! `plimsoll-indexer::api::build_router`'s
//! `Router::new().route(...).layer(...)` shape, with a `TraceLayer`
//! added for request logging (SPEC_FULL.md §C).

use crate::handlers::{audit, auth, decisions, packets, users};
use crate::middleware::auth_layer;
use crate::state::AppState;
use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", post(auth::logout))
        .route("/users", post(users::create_user).get(users::list_users))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/decisions", post(decisions::create_decision))
        .route("/decisions/{id}", get(decisions::get_decision))
        .route("/decisions/{id}/sign", post(decisions::sign_decision))
        .route("/decisions/{id}/reject", post(decisions::reject_decision))
        .route("/audit", get(audit::list_audit))
        .route("/audit/verify", post(audit::verify_chain))
        .route("/audit/checkpoint", post(audit::export_checkpoint))
        .route("/packets", post(packets::issue_packet))
        .route("/packets/merkle-root", get(packets::merkle_root))
        .route("/packets/{id}", get(packets::get_packet))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_layer));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/login", post(auth::login))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
