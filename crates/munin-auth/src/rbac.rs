//! The authoritative role -> permission matrix (spec.md §4.6), fixed
//! at build time. `(*, *)` matches everything; a `*` on either side of
//! a pair matches everything on that side only.

use munin_error::Error;
use munin_keys::Role;

const OPERATOR_PERMS: &[(&str, &str)] = &[
    ("decisions", "create"),
    ("decisions", "sign"),
    ("decisions", "view"),
    ("packets", "view"),
    ("packets", "authorize"),
    ("incidents", "view"),
    ("graph", "view"),
    ("simulation", "run"),
];

const VIEWER_PERMS: &[(&str, &str)] = &[
    ("decisions", "view"),
    ("packets", "view"),
    ("incidents", "view"),
    ("graph", "view"),
];

const REGULATORY_COMPLIANCE_PERMS: &[(&str, &str)] = &[
    ("decisions", "view"),
    ("decisions", "sign"),
    ("packets", "view"),
    ("audit", "view"),
    ("incidents", "view"),
    ("graph", "view"),
];

const MINISTRY_EXTRA: &[(&str, &str)] = &[("cmi", "activate"), ("cmi", "authorize")];
const WATER_EXTRA: &[(&str, &str)] = &[("water", "*")];
const POWER_EXTRA: &[(&str, &str)] = &[("power", "*")];

fn entries_for(role: Role) -> Vec<(&'static str, &'static str)> {
    match role {
        Role::Admin => vec![("*", "*")],
        Role::Operator | Role::Defense | Role::EmergencyServices => OPERATOR_PERMS.to_vec(),
        Role::Viewer => VIEWER_PERMS.to_vec(),
        Role::RegulatoryCompliance => REGULATORY_COMPLIANCE_PERMS.to_vec(),
        Role::MinistryOfDefense => OPERATOR_PERMS.iter().chain(MINISTRY_EXTRA).copied().collect(),
        Role::WaterAuthority => OPERATOR_PERMS.iter().chain(WATER_EXTRA).copied().collect(),
        Role::PowerGridOperator => OPERATOR_PERMS.iter().chain(POWER_EXTRA).copied().collect(),
    }
}

/// True if any entry for `role` matches `(resource, action)` exactly,
/// via a `resource=*` wildcard, a `action=*` wildcard, or `(*, *)`.
pub fn has_permission(role: Role, resource: &str, action: &str) -> bool {
    entries_for(role)
        .into_iter()
        .any(|(r, a)| (r == resource || r == "*") && (a == action || a == "*"))
}

/// Returns `Ok(())` or a typed `PermissionDenied`, for call sites that
/// want `?` rather than an `if` (spec.md §4.6 `require_permission`).
pub fn require_permission(role: Role, resource: &str, action: &str) -> Result<(), Error> {
    if has_permission(role, resource, action) {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}
