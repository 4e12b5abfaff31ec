//! Bridges a validated `Session` to the RBAC matrix (spec.md §4.6):
//! resolves the session's user, then checks `(resource, action)`
//! against their role. Every mutating and read handler calls this
//! before touching a component — the permission matrix is the sole
//! gate, never duplicated per handler.

use crate::state::AppState;
use munin_auth::{rbac, Session};
use munin_error::MuninResult;
use munin_keys::Role;

/// Returns the session owner's `Role` if `(resource, action)` is
/// permitted, else `Error::PermissionDenied`.
pub fn require(state: &AppState, session: &Session, resource: &str, action: &str) -> MuninResult<Role> {
    let user = state.keys.get_user(&session.user_id)?;
    rbac::require_permission(user.role, resource, action)?;
    Ok(user.role)
}
