//! HTTP surface for the authorization and audit core (spec.md §6).
//!
//! Exposed as a library so `tests/e2e.rs` can drive the real
//! `axum::Router` in-process via `tower::ServiceExt::oneshot` against
//! an in-memory storage handle, without spawning the binary.

pub mod authz;
pub mod config;
pub mod error_response;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
