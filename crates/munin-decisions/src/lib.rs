//! M-of-N multi-signature decision state machine (spec.md §4.5, C5).
//!
//! ```text
//! PENDING -> AUTHORIZED   (threshold reached via valid signatures)
//! PENDING -> REJECTED     (explicit)
//! AUTHORIZED -> EXECUTED  (explicit, by packet issuance)
//! AUTHORIZED -> REJECTED  forbidden
//! EXECUTED is terminal
//! ```

mod types;

pub use types::{Decision, DecisionPolicy, DecisionSignature, DecisionStatus, DecisionView};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use munin_audit::AuditLog;
use munin_canon::{canonicalize, JsonValue};
use munin_crypto::{sha256_hex, verify_signature};
use munin_error::{Error, MuninResult};
use munin_keys::KeyRegistry;
use munin_storage::{rusqlite::params, rusqlite::OptionalExtension, Storage};
use std::sync::Arc;
use tracing::{info, warn};

pub struct DecisionEngine {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
    keys: Arc<KeyRegistry>,
}

impl DecisionEngine {
    pub fn new(storage: Arc<Storage>, audit: Arc<AuditLog>, keys: Arc<KeyRegistry>) -> Self {
        DecisionEngine {
            storage,
            audit,
            keys,
        }
    }

    /// Creates a new PENDING decision. `decision_id` is minted by the
    /// caller (typically a UUID) so the chain-broken error below can
    /// name it even though the row does not exist yet.
    #[allow(clippy::too_many_arguments)]
    pub fn create_decision(
        &self,
        decision_id: &str,
        incident_id: &str,
        playbook_id: &str,
        step_id: Option<&str>,
        action_type: &str,
        scope: JsonValue,
        policy: DecisionPolicy,
        previous_decision_hash: Option<&str>,
    ) -> MuninResult<Decision> {
        policy.validate()?;

        self.storage.with_tx(|tx| {
            let created_at = Utc::now();

            if let Some(expected_prev) = previous_decision_hash {
                let mut found = false;
                let mut stmt = tx
                    .prepare(
                        "SELECT decision_id, incident_id, playbook_id, step_id, action_type, scope_json, status, threshold, required, signers_json, created_at, authorized_at, previous_decision_hash
                         FROM decisions WHERE incident_id = ?1 AND status = 'AUTHORIZED'",
                    )
                    .map_err(munin_storage::sql_err)?;
                let mut rows = stmt
                    .query(params![incident_id])
                    .map_err(munin_storage::sql_err)?;
                while let Some(row) = rows.next().map_err(munin_storage::sql_err)? {
                    let candidate = decode_decision_row(row)?;
                    if decision_hash(&candidate)? == expected_prev {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Err(Error::DecisionChainBroken {
                        decision_id: decision_id.to_string(),
                    });
                }
            }

            let canonical_scope =
                canonicalize(&scope).map_err(|e| Error::Encoding(e.to_string()))?;
            let signers_json = serde_json::to_string(&policy.signers)
                .map_err(|e| Error::Encoding(e.to_string()))?;

            tx.execute(
                "INSERT INTO decisions (decision_id, incident_id, playbook_id, step_id, action_type, scope_json, status, threshold, required, signers_json, created_at, authorized_at, previous_decision_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7, ?8, ?9, ?10, NULL, ?11)",
                params![
                    decision_id,
                    incident_id,
                    playbook_id,
                    step_id,
                    action_type,
                    canonical_scope,
                    policy.threshold,
                    policy.required,
                    signers_json,
                    created_at.to_rfc3339(),
                    previous_decision_hash,
                ],
            )
            .map_err(munin_storage::sql_err)?;

            let payload = JsonValue::object([
                ("decision_id".to_string(), JsonValue::string(decision_id)),
                ("incident_id".to_string(), JsonValue::string(incident_id)),
                ("playbook_id".to_string(), JsonValue::string(playbook_id)),
                ("action_type".to_string(), JsonValue::string(action_type)),
                (
                    "threshold".to_string(),
                    JsonValue::Number(policy.threshold.into()),
                ),
                (
                    "required".to_string(),
                    JsonValue::Number(policy.required.into()),
                ),
            ]);
            self.audit
                .append_in_tx(tx, "DECISION_CREATED", payload, None)?;

            info!(decision_id, incident_id, "decision created");

            Ok(Decision {
                decision_id: decision_id.to_string(),
                incident_id: incident_id.to_string(),
                playbook_id: playbook_id.to_string(),
                step_id: step_id.map(str::to_string),
                action_type: action_type.to_string(),
                scope,
                status: DecisionStatus::Pending,
                policy,
                created_at,
                authorized_at: None,
                previous_decision_hash: previous_decision_hash.map(str::to_string),
            })
        })
    }

    /// Verifies and records one signer's signature. On threshold
    /// crossing, transitions the decision to AUTHORIZED in the same
    /// transaction (spec.md §4.5).
    pub fn submit_signature(
        &self,
        decision_id: &str,
        signer_id: &str,
        signature_b64: &str,
        key_id: &str,
        action_type: &str,
        scope: &JsonValue,
    ) -> MuninResult<Decision> {
        self.storage.with_tx(|tx| {
            let mut decision = self.load_decision_tx(tx, decision_id)?;

            if decision.status != DecisionStatus::Pending {
                return Err(Error::WrongState(format!(
                    "decision {decision_id} is {}",
                    decision.status.as_str()
                )));
            }
            if !decision.policy.signers.iter().any(|s| s == signer_id) {
                return Err(Error::UnknownSigner {
                    signer_id: signer_id.to_string(),
                });
            }

            let already: i64 = tx
                .query_row(
                    "SELECT count(*) FROM decision_signatures WHERE decision_id = ?1 AND signer_id = ?2",
                    params![decision_id, signer_id],
                    |row| row.get(0),
                )
                .map_err(munin_storage::sql_err)?;
            if already > 0 {
                return Err(Error::Conflict(format!(
                    "signer {signer_id} already signed decision {decision_id}"
                )));
            }

            if !self.keys.new_authorization_allowed(key_id)? {
                return Err(Error::KeyNotActive {
                    key_id: key_id.to_string(),
                });
            }
            let key = self.keys.get_key(key_id)?;
            if key.user_id != signer_id {
                return Err(Error::SignatureInvalid);
            }

            // The message being verified is always built from the
            // decision's own stored fields — a caller cannot smuggle
            // a different action_type/scope into a valid signature by
            // echoing different values back in the request body.
            if action_type != decision.action_type || scope != &decision.scope {
                return Err(Error::SignatureInvalid);
            }

            let message = canonical_decision_message(&decision)?;
            let sig_bytes = BASE64
                .decode(signature_b64)
                .map_err(|_| Error::SignatureInvalid)?;
            if !verify_signature(&key.public_key, message.as_bytes(), &sig_bytes) {
                return Err(Error::SignatureInvalid);
            }

            let signed_at = Utc::now();
            tx.execute(
                "INSERT INTO decision_signatures (decision_id, signer_id, signature, key_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![decision_id, signer_id, signature_b64, key_id, signed_at.to_rfc3339()],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!(
                        "signer {signer_id} already signed decision {decision_id}"
                    ))
                } else {
                    munin_storage::sql_err(e)
                }
            })?;

            let sig_payload = JsonValue::object([
                ("decision_id".to_string(), JsonValue::string(decision_id)),
                ("signer_id".to_string(), JsonValue::string(signer_id)),
                ("key_id".to_string(), JsonValue::string(key_id)),
                ("signature".to_string(), JsonValue::string(signature_b64)),
            ]);
            self.audit
                .append_in_tx(tx, "DECISION_SIGNED", sig_payload, None)?;
            info!(decision_id, signer_id, "decision signed");

            let distinct_signers: i64 = tx
                .query_row(
                    "SELECT count(*) FROM decision_signatures WHERE decision_id = ?1",
                    params![decision_id],
                    |row| row.get(0),
                )
                .map_err(munin_storage::sql_err)?;

            if distinct_signers as u32 >= decision.policy.threshold {
                let authorized_at = Utc::now();
                tx.execute(
                    "UPDATE decisions SET status = 'AUTHORIZED', authorized_at = ?1 WHERE decision_id = ?2",
                    params![authorized_at.to_rfc3339(), decision_id],
                )
                .map_err(munin_storage::sql_err)?;

                let decision_hash_value = decision_hash(&decision)?;
                let auth_payload = JsonValue::object([
                    ("decision_id".to_string(), JsonValue::string(decision_id)),
                    (
                        "decision_message_hash".to_string(),
                        JsonValue::string(decision_hash_value),
                    ),
                    (
                        "signer_count".to_string(),
                        JsonValue::Number(distinct_signers.into()),
                    ),
                ]);
                self.audit
                    .append_in_tx(tx, "DECISION_AUTHORIZED", auth_payload, None)?;

                decision.status = DecisionStatus::Authorized;
                decision.authorized_at = Some(authorized_at);
                info!(decision_id, "decision authorized");
            }

            Ok(decision)
        })
    }

    /// Explicit rejection. Only valid from PENDING — `AUTHORIZED ->
    /// REJECTED` is forbidden by the state machine (spec.md §4.5).
    pub fn reject_decision(&self, decision_id: &str) -> MuninResult<Decision> {
        self.storage.with_tx(|tx| {
            let mut decision = self.load_decision_tx(tx, decision_id)?;
            if decision.status != DecisionStatus::Pending {
                return Err(Error::WrongState(format!(
                    "decision {decision_id} is {}, cannot reject",
                    decision.status.as_str()
                )));
            }
            tx.execute(
                "UPDATE decisions SET status = 'REJECTED' WHERE decision_id = ?1",
                params![decision_id],
            )
            .map_err(munin_storage::sql_err)?;

            let payload = JsonValue::object([(
                "decision_id".to_string(),
                JsonValue::string(decision_id),
            )]);
            self.audit
                .append_in_tx(tx, "DECISION_REJECTED", payload, None)?;
            decision.status = DecisionStatus::Rejected;
            warn!(decision_id, "decision rejected");
            Ok(decision)
        })
    }

    /// Transitions an AUTHORIZED decision to EXECUTED. Called by
    /// `munin-packets` once a handshake receipt referencing this
    /// decision has committed.
    pub fn execute_decision_tx(
        &self,
        tx: &munin_storage::rusqlite::Transaction,
        decision_id: &str,
    ) -> MuninResult<()> {
        let decision = self.load_decision_tx(tx, decision_id)?;
        if decision.status != DecisionStatus::Authorized {
            return Err(Error::WrongState(format!(
                "decision {decision_id} is {}, cannot execute",
                decision.status.as_str()
            )));
        }
        tx.execute(
            "UPDATE decisions SET status = 'EXECUTED' WHERE decision_id = ?1",
            params![decision_id],
        )
        .map_err(munin_storage::sql_err)?;
        let payload = JsonValue::object([(
            "decision_id".to_string(),
            JsonValue::string(decision_id),
        )]);
        self.audit
            .append_in_tx(tx, "DECISION_EXECUTED", payload, None)?;
        info!(decision_id, "decision executed");
        Ok(())
    }

    pub fn get_decision(&self, decision_id: &str) -> MuninResult<DecisionView> {
        self.storage.with_conn(|conn| {
            let decision = load_decision_row(conn, decision_id)?;
            let signatures = load_signatures(conn, decision_id)?;
            Ok(DecisionView {
                decision,
                signatures,
            })
        })
    }

    fn load_decision_tx(
        &self,
        tx: &munin_storage::rusqlite::Transaction,
        decision_id: &str,
    ) -> MuninResult<Decision> {
        tx.query_row(
            "SELECT decision_id, incident_id, playbook_id, step_id, action_type, scope_json, status, threshold, required, signers_json, created_at, authorized_at, previous_decision_hash
             FROM decisions WHERE decision_id = ?1",
            params![decision_id],
            |row| Ok(decode_decision_row(row)),
        )
        .optional()
        .map_err(munin_storage::sql_err)?
        .ok_or_else(|| Error::NotFound(format!("no such decision: {decision_id}")))?
    }
}

fn load_decision_row(
    conn: &munin_storage::rusqlite::Connection,
    decision_id: &str,
) -> MuninResult<Decision> {
    conn.query_row(
        "SELECT decision_id, incident_id, playbook_id, step_id, action_type, scope_json, status, threshold, required, signers_json, created_at, authorized_at, previous_decision_hash
         FROM decisions WHERE decision_id = ?1",
        params![decision_id],
        |row| Ok(decode_decision_row(row)),
    )
    .optional()
    .map_err(munin_storage::sql_err)?
    .ok_or_else(|| Error::NotFound(format!("no such decision: {decision_id}")))?
}

fn load_signatures(
    conn: &munin_storage::rusqlite::Connection,
    decision_id: &str,
) -> MuninResult<Vec<DecisionSignature>> {
    let mut stmt = conn
        .prepare(
            "SELECT decision_id, signer_id, signature, key_id, created_at FROM decision_signatures WHERE decision_id = ?1 ORDER BY created_at ASC",
        )
        .map_err(munin_storage::sql_err)?;
    let rows = stmt
        .query_map(params![decision_id], |row| {
            let decision_id: String = row.get(0)?;
            let signer_id: String = row.get(1)?;
            let signature: String = row.get(2)?;
            let key_id: String = row.get(3)?;
            let created_raw: String = row.get(4)?;
            Ok((decision_id, signer_id, signature, key_id, created_raw))
        })
        .map_err(munin_storage::sql_err)?;
    let mut out = Vec::new();
    for row in rows {
        let (decision_id, signer_id, signature, key_id, created_raw) =
            row.map_err(munin_storage::sql_err)?;
        let created_at = DateTime::parse_from_rfc3339(&created_raw)
            .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        out.push(DecisionSignature {
            decision_id,
            signer_id,
            signature,
            key_id,
            created_at,
        });
    }
    Ok(out)
}

fn decode_decision_row(row: &munin_storage::rusqlite::Row<'_>) -> MuninResult<Decision> {
    let decision_id: String = row.get(0).map_err(munin_storage::sql_err)?;
    let incident_id: String = row.get(1).map_err(munin_storage::sql_err)?;
    let playbook_id: String = row.get(2).map_err(munin_storage::sql_err)?;
    let step_id: Option<String> = row.get(3).map_err(munin_storage::sql_err)?;
    let action_type: String = row.get(4).map_err(munin_storage::sql_err)?;
    let scope_json: String = row.get(5).map_err(munin_storage::sql_err)?;
    let status_raw: String = row.get(6).map_err(munin_storage::sql_err)?;
    let threshold: u32 = row.get(7).map_err(munin_storage::sql_err)?;
    let required: u32 = row.get(8).map_err(munin_storage::sql_err)?;
    let signers_json: String = row.get(9).map_err(munin_storage::sql_err)?;
    let created_raw: String = row.get(10).map_err(munin_storage::sql_err)?;
    let authorized_raw: Option<String> = row.get(11).map_err(munin_storage::sql_err)?;
    let previous_decision_hash: Option<String> = row.get(12).map_err(munin_storage::sql_err)?;

    let status = DecisionStatus::parse(&status_raw)?;
    let signers: Vec<String> =
        serde_json::from_str(&signers_json).map_err(|e| Error::StorageFailure(e.to_string()))?;
    let scope_value: serde_json::Value =
        serde_json::from_str(&scope_json).map_err(|e| Error::StorageFailure(e.to_string()))?;
    let scope = JsonValue::try_from(scope_value)?;
    let created_at = DateTime::parse_from_rfc3339(&created_raw)
        .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
        .with_timezone(&Utc);
    let authorized_at = match authorized_raw {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(Decision {
        decision_id,
        incident_id,
        playbook_id,
        step_id,
        action_type,
        scope,
        status,
        policy: DecisionPolicy {
            threshold,
            required,
            signers,
        },
        created_at,
        authorized_at,
        previous_decision_hash,
    })
}

/// The canonical decision message every signer signs (spec.md §4.5).
/// Determinism here is load-bearing: two independent callers
/// canonicalizing the same logical decision must produce byte-equal
/// output.
pub fn canonical_decision_message(decision: &Decision) -> MuninResult<String> {
    let message = JsonValue::object([
        (
            "decision_id".to_string(),
            JsonValue::string(&decision.decision_id),
        ),
        (
            "incident_id".to_string(),
            JsonValue::string(&decision.incident_id),
        ),
        (
            "action_type".to_string(),
            JsonValue::string(&decision.action_type),
        ),
        ("scope".to_string(), decision.scope.clone()),
        (
            "created_at".to_string(),
            JsonValue::string(decision.created_at.to_rfc3339()),
        ),
        (
            "previous_decision_hash".to_string(),
            match &decision.previous_decision_hash {
                Some(h) => JsonValue::string(h),
                None => JsonValue::Null,
            },
        ),
    ]);
    canonicalize(&message).map_err(|e| Error::Encoding(e.to_string()))
}

/// SHA-256 of the canonical decision message — what a later decision's
/// `previous_decision_hash` must match to chain onto this one
/// (spec.md §4.5 Chaining).
pub fn decision_hash(decision: &Decision) -> MuninResult<String> {
    Ok(sha256_hex(canonical_decision_message(decision)?.as_bytes()))
}

fn is_unique_violation(e: &munin_storage::rusqlite::Error) -> bool {
    matches!(
        e,
        munin_storage::rusqlite::Error::SqliteFailure(err, _)
            if err.code == munin_storage::rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use munin_keys::Role;
    use rand_core::OsRng;

    struct Harness {
        storage: Arc<Storage>,
        audit: Arc<AuditLog>,
        keys: Arc<KeyRegistry>,
        engine: DecisionEngine,
    }

    fn harness() -> Harness {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let audit = Arc::new(AuditLog::new(storage.clone()));
        let keys = Arc::new(KeyRegistry::new(storage.clone(), audit.clone()));
        let engine = DecisionEngine::new(storage.clone(), audit.clone(), keys.clone());
        Harness {
            storage,
            audit,
            keys,
            engine,
        }
    }

    fn register(h: &Harness, user_id: &str, key_id: &str) -> SigningKey {
        let sk = SigningKey::generate(&mut OsRng);
        let pubkey_b64 = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode(sk.verifying_key().to_bytes())
        };
        h.keys
            .register_user(user_id, user_id, Role::Operator, &pubkey_b64, key_id, "hash")
            .unwrap();
        sk
    }

    fn sign_for(decision: &Decision, sk: &SigningKey) -> String {
        let message = canonical_decision_message(decision).unwrap();
        let sig = sk.sign(message.as_bytes()).to_bytes();
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        STANDARD.encode(sig)
    }

    fn scope() -> JsonValue {
        JsonValue::object([("target".to_string(), JsonValue::string("valve-7"))])
    }

    #[test]
    fn one_of_one_authorizes_on_first_signature() {
        let h = harness();
        let sk = register(&h, "u1", "k1");
        let decision = h
            .engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 1,
                    required: 1,
                    signers: vec!["u1".into()],
                },
                None,
            )
            .unwrap();

        let sig = sign_for(&decision, &sk);
        let updated = h
            .engine
            .submit_signature("d1", "u1", &sig, "k1", "shutdown", &scope())
            .unwrap();
        assert_eq!(updated.status, DecisionStatus::Authorized);
        assert!(updated.authorized_at.is_some());

        let entries = h.audit.list(Default::default()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event_type, "DECISION_CREATED");
        assert_eq!(entries[1].event_type, "DECISION_SIGNED");
        assert_eq!(entries[2].event_type, "DECISION_AUTHORIZED");
    }

    #[test]
    fn two_of_three_partial_then_complete_then_locked() {
        let h = harness();
        let sk1 = register(&h, "u1", "k1");
        let sk2 = register(&h, "u2", "k2");
        let sk3 = register(&h, "u3", "k3");
        let decision = h
            .engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 2,
                    required: 3,
                    signers: vec!["u1".into(), "u2".into(), "u3".into()],
                },
                None,
            )
            .unwrap();

        let sig1 = sign_for(&decision, &sk1);
        let after1 = h
            .engine
            .submit_signature("d1", "u1", &sig1, "k1", "shutdown", &scope())
            .unwrap();
        assert_eq!(after1.status, DecisionStatus::Pending);

        let sig2 = sign_for(&decision, &sk2);
        let after2 = h
            .engine
            .submit_signature("d1", "u2", &sig2, "k2", "shutdown", &scope())
            .unwrap();
        assert_eq!(after2.status, DecisionStatus::Authorized);

        let sig3 = sign_for(&decision, &sk3);
        let result = h
            .engine
            .submit_signature("d1", "u3", &sig3, "k3", "shutdown", &scope());
        assert!(matches!(result, Err(Error::WrongState(_))));
    }

    #[test]
    fn duplicate_signature_is_rejected() {
        let h = harness();
        let sk1 = register(&h, "u1", "k1");
        register(&h, "u2", "k2");
        let decision = h
            .engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 2,
                    required: 2,
                    signers: vec!["u1".into(), "u2".into()],
                },
                None,
            )
            .unwrap();
        let sig1 = sign_for(&decision, &sk1);
        h.engine
            .submit_signature("d1", "u1", &sig1, "k1", "shutdown", &scope())
            .unwrap();
        let dup = h
            .engine
            .submit_signature("d1", "u1", &sig1, "k1", "shutdown", &scope());
        assert!(matches!(dup, Err(Error::Conflict(_))));
    }

    #[test]
    fn revoked_key_rejects_new_signature() {
        let h = harness();
        let sk1 = register(&h, "u1", "k1");
        let decision = h
            .engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 1,
                    required: 1,
                    signers: vec!["u1".into()],
                },
                None,
            )
            .unwrap();
        h.keys.revoke_key("u1", "k1").unwrap();
        let sig = sign_for(&decision, &sk1);
        let result = h
            .engine
            .submit_signature("d1", "u1", &sig, "k1", "shutdown", &scope());
        assert!(matches!(result, Err(Error::KeyNotActive { .. })));
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let h = harness();
        register(&h, "u1", "k1");
        register(&h, "u2", "k2");
        h.engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 1,
                    required: 1,
                    signers: vec!["u1".into()],
                },
                None,
            )
            .unwrap();
        let result = h
            .engine
            .submit_signature("d1", "u2", "deadbeef", "k2", "shutdown", &scope());
        assert!(matches!(result, Err(Error::UnknownSigner { .. })));
    }

    #[test]
    fn chains_onto_prior_authorized_decision_in_same_incident() {
        let h = harness();
        let sk1 = register(&h, "u1", "k1");
        let d1 = h
            .engine
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "shutdown",
                scope(),
                DecisionPolicy {
                    threshold: 1,
                    required: 1,
                    signers: vec!["u1".into()],
                },
                None,
            )
            .unwrap();
        let sig1 = sign_for(&d1, &sk1);
        let d1_authorized = h
            .engine
            .submit_signature("d1", "u1", &sig1, "k1", "shutdown", &scope())
            .unwrap();
        let expected_hash = decision_hash(&d1_authorized).unwrap();

        let d2 = h.engine.create_decision(
            "d2",
            "incident-1",
            "playbook-1",
            None,
            "escalate",
            scope(),
            DecisionPolicy {
                threshold: 1,
                required: 1,
                signers: vec!["u1".into()],
            },
            Some(&expected_hash),
        );
        assert!(d2.is_ok());
    }

    #[test]
    fn wrong_previous_decision_hash_is_chain_broken() {
        let h = harness();
        register(&h, "u1", "k1");
        let result = h.engine.create_decision(
            "d1",
            "incident-1",
            "playbook-1",
            None,
            "shutdown",
            scope(),
            DecisionPolicy {
                threshold: 1,
                required: 1,
                signers: vec!["u1".into()],
            },
            Some("0000000000000000000000000000000000000000000000000000000000000000"),
        );
        assert!(matches!(result, Err(Error::DecisionChainBroken { .. })));
    }

    #[test]
    fn invalid_policy_is_rejected_before_any_storage_write() {
        let h = harness();
        let result = h.engine.create_decision(
            "d1",
            "incident-1",
            "playbook-1",
            None,
            "shutdown",
            scope(),
            DecisionPolicy {
                threshold: 3,
                required: 2,
                signers: vec!["u1".into(), "u2".into()],
            },
            None,
        );
        assert!(matches!(result, Err(Error::InputInvalid(_))));
    }
}
