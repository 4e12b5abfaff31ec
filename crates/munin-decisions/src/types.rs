use chrono::{DateTime, Utc};
use munin_canon::JsonValue;
use munin_error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStatus {
    Pending,
    Authorized,
    Rejected,
    Executed,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Pending => "PENDING",
            DecisionStatus::Authorized => "AUTHORIZED",
            DecisionStatus::Rejected => "REJECTED",
            DecisionStatus::Executed => "EXECUTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "PENDING" => Ok(DecisionStatus::Pending),
            "AUTHORIZED" => Ok(DecisionStatus::Authorized),
            "REJECTED" => Ok(DecisionStatus::Rejected),
            "EXECUTED" => Ok(DecisionStatus::Executed),
            other => Err(Error::StorageFailure(format!(
                "corrupt decision status: {other}"
            ))),
        }
    }
}

/// `{threshold: M, required: N, signers: [user_id...]}` (spec.md §3).
/// `1 <= threshold <= required == signers.len()`, no duplicate signers.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    pub threshold: u32,
    pub required: u32,
    pub signers: Vec<String>,
}

impl DecisionPolicy {
    pub fn validate(&self) -> Result<(), Error> {
        if self.threshold < 1 {
            return Err(Error::InputInvalid("policy.threshold must be >= 1".into()));
        }
        if self.required as usize != self.signers.len() {
            return Err(Error::InputInvalid(
                "policy.required must equal the number of distinct signers".into(),
            ));
        }
        if self.threshold > self.required {
            return Err(Error::InputInvalid(
                "policy.threshold must not exceed policy.required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for s in &self.signers {
            if !seen.insert(s) {
                return Err(Error::InputInvalid(format!(
                    "policy.signers contains duplicate: {s}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub decision_id: String,
    pub incident_id: String,
    pub playbook_id: String,
    pub step_id: Option<String>,
    pub action_type: String,
    pub scope: JsonValue,
    pub status: DecisionStatus,
    pub policy: DecisionPolicy,
    pub created_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub previous_decision_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionSignature {
    pub decision_id: String,
    pub signer_id: String,
    pub signature: String, // base64
    pub key_id: String,
    pub created_at: DateTime<Utc>,
}

/// A decision plus the signatures submitted against it so far — the
/// shape `GET /decisions/{id}` returns (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionView {
    pub decision: Decision,
    pub signatures: Vec<DecisionSignature>,
}
