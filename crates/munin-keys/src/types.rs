use chrono::{DateTime, Utc};
use munin_error::Error;
use std::fmt;

/// The authoritative role vocabulary (spec.md §4.6). A role outside
/// this set is `Error::InputInvalid` at user-creation time (spec.md
/// §9 Open Questions — resolved in favor of the superset listed in
/// the RBAC matrix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Operator,
    Viewer,
    MinistryOfDefense,
    Defense,
    WaterAuthority,
    PowerGridOperator,
    RegulatoryCompliance,
    EmergencyServices,
}

impl Role {
    pub const ALL: &'static [Role] = &[
        Role::Admin,
        Role::Operator,
        Role::Viewer,
        Role::MinistryOfDefense,
        Role::Defense,
        Role::WaterAuthority,
        Role::PowerGridOperator,
        Role::RegulatoryCompliance,
        Role::EmergencyServices,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
            Role::MinistryOfDefense => "ministry_of_defense",
            Role::Defense => "defense",
            Role::WaterAuthority => "water_authority",
            Role::PowerGridOperator => "power_grid_operator",
            Role::RegulatoryCompliance => "regulatory_compliance",
            Role::EmergencyServices => "emergency_services",
        }
    }

    pub fn parse(s: &str) -> Result<Role, Error> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::InputInvalid(format!("unknown role: {s}")))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "DISABLED" => Ok(UserStatus::Disabled),
            other => Err(Error::StorageFailure(format!(
                "corrupt user status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "ACTIVE",
            KeyStatus::Rotated => "ROTATED",
            KeyStatus::Revoked => "REVOKED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "ACTIVE" => Ok(KeyStatus::Active),
            "ROTATED" => Ok(KeyStatus::Rotated),
            "REVOKED" => Ok(KeyStatus::Revoked),
            other => Err(Error::StorageFailure(format!(
                "corrupt key status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub current_key_id: String,
    pub status: UserStatus,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub key_id: String,
    pub user_id: String,
    pub public_key: String, // base64, 32 raw bytes
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub rotated_to_key_id: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
}
