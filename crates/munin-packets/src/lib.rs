//! Handshake packet issuance and the packet chain (spec.md §4.7, C7).
//!
//! A packet is a second, parallel hash chain over authorized
//! handshakes — distinct from the audit log's own chain, but every
//! issuance still lands an audit entry so the two chains can be
//! cross-checked. Issuing a packet is also what drives a decision's
//! final `AUTHORIZED -> EXECUTED` transition (spec.md §3's lifecycle
//! table: "explicit, by packet issuance").

mod types;

use chrono::Utc;
use munin_audit::AuditLog;
use munin_canon::{canonicalize, JsonValue};
use munin_crypto::sha256_hex;
use munin_decisions::DecisionEngine;
use munin_error::{Error, MuninResult};
use munin_storage::{rusqlite::params, rusqlite::OptionalExtension, Storage};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub use types::Packet;

/// The namespace used when a caller issues a packet without naming
/// one (spec.md's Open Questions: "global chain by default, with a
/// `namespace` field ... so a future per-scope chain is a filter, not
/// a schema change").
pub const GLOBAL_NAMESPACE: &str = "global";

pub struct PacketLog {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
    decisions: Arc<DecisionEngine>,
}

impl PacketLog {
    pub fn new(storage: Arc<Storage>, audit: Arc<AuditLog>, decisions: Arc<DecisionEngine>) -> Self {
        PacketLog {
            storage,
            audit,
            decisions,
        }
    }

    /// Issues a packet against an AUTHORIZED decision, appending it to
    /// `namespace`'s chain and executing the decision — all in one
    /// transaction. `namespace` defaults to [`GLOBAL_NAMESPACE`] when
    /// `None`.
    pub fn issue_packet(
        &self,
        decision_id: &str,
        namespace: Option<&str>,
        content: JsonValue,
    ) -> MuninResult<Packet> {
        let namespace = namespace.unwrap_or(GLOBAL_NAMESPACE).to_string();
        let canonical_content =
            canonicalize(&content).map_err(|e| Error::Encoding(e.to_string()))?;
        let packet_hash = sha256_hex(canonical_content.as_bytes());

        self.storage.with_tx(|tx| {
            let head: Option<(i64, String)> = tx
                .query_row(
                    "SELECT sequence_number, receipt_hash FROM handshake_packets WHERE namespace = ?1 ORDER BY sequence_number DESC LIMIT 1",
                    params![namespace],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(munin_storage::sql_err)?;

            let (sequence_number, previous_receipt_hash) = match head {
                Some((last_seq, last_receipt)) => (last_seq + 1, Some(last_receipt)),
                None => (1, None),
            };

            let receipt_hash = compute_receipt_hash(previous_receipt_hash.as_deref(), &packet_hash);
            let packet_id = Uuid::new_v4().to_string();
            let created_at = Utc::now();

            tx.execute(
                "INSERT INTO handshake_packets (packet_id, decision_id, namespace, previous_receipt_hash, packet_hash, receipt_hash, sequence_number, content_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    packet_id,
                    decision_id,
                    namespace,
                    previous_receipt_hash,
                    packet_hash,
                    receipt_hash,
                    sequence_number,
                    canonical_content,
                    created_at.to_rfc3339(),
                ],
            )
            .map_err(munin_storage::sql_err)?;

            self.decisions.execute_decision_tx(tx, decision_id)?;

            let payload = JsonValue::object([
                ("packet_id".to_string(), JsonValue::string(&packet_id)),
                ("decision_id".to_string(), JsonValue::string(decision_id)),
                ("namespace".to_string(), JsonValue::string(&namespace)),
                ("receipt_hash".to_string(), JsonValue::string(&receipt_hash)),
            ]);
            self.audit.append_in_tx(tx, "PACKET_ISSUED", payload, None)?;

            info!(packet_id, decision_id, namespace, sequence_number, "packet issued");

            Ok(Packet {
                packet_id,
                decision_id: decision_id.to_string(),
                namespace,
                previous_receipt_hash,
                packet_hash,
                receipt_hash,
                sequence_number,
                content,
                created_at,
            })
        })
    }

    pub fn get_packet(&self, packet_id: &str) -> MuninResult<Packet> {
        self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT packet_id, decision_id, namespace, previous_receipt_hash, packet_hash, receipt_hash, sequence_number, content_json, created_at
                 FROM handshake_packets WHERE packet_id = ?1",
                params![packet_id],
                row_to_packet,
            )
            .map_err(|_| Error::NotFound(format!("no such packet: {packet_id}")))?
        })
    }

    /// Lists a namespace's packets oldest-first, the chain order
    /// needed to walk or re-verify the receipt links.
    pub fn list_chain(&self, namespace: &str) -> MuninResult<Vec<Packet>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT packet_id, decision_id, namespace, previous_receipt_hash, packet_hash, receipt_hash, sequence_number, content_json, created_at
                     FROM handshake_packets WHERE namespace = ?1 ORDER BY sequence_number ASC",
                )
                .map_err(munin_storage::sql_err)?;
            let rows = stmt
                .query_map(params![namespace], row_to_packet)
                .map_err(munin_storage::sql_err)?;
            let mut packets = Vec::new();
            for row in rows {
                packets.push(row.map_err(munin_storage::sql_err)??);
            }
            Ok(packets)
        })
    }

    /// Recomputes the packet chain's own closure: each row's
    /// `receipt_hash` must match `compute_receipt_hash` of its
    /// predecessor. Mirrors `munin-audit`'s `verify_chain` but over
    /// the packet table; never mutates state.
    pub fn verify_chain(&self, namespace: &str) -> MuninResult<()> {
        let packets = self.list_chain(namespace)?;
        let mut prev_receipt: Option<String> = None;
        for packet in &packets {
            if packet.previous_receipt_hash != prev_receipt {
                return Err(Error::PacketChainBroken {
                    packet_id: packet.packet_id.clone(),
                });
            }
            let expected = compute_receipt_hash(prev_receipt.as_deref(), &packet.packet_hash);
            if expected != packet.receipt_hash {
                return Err(Error::HashMismatch {
                    seq: packet.sequence_number,
                    expected,
                    got: packet.receipt_hash.clone(),
                });
            }
            prev_receipt = Some(packet.receipt_hash.clone());
        }
        Ok(())
    }

    /// The "sovereign hash": a Merkle root over `namespace`'s receipt
    /// hashes up to and including `up_to_seq` (or the whole chain when
    /// `None`), summarizing the authorization history at that point
    /// (spec.md §4.7, GLOSSARY "Sovereign hash").
    pub fn merkle_root(&self, namespace: &str, up_to_seq: Option<i64>) -> MuninResult<Option<String>> {
        let packets = self.list_chain(namespace)?;
        let leaves: Vec<String> = packets
            .into_iter()
            .filter(|p| up_to_seq.map_or(true, |cap| p.sequence_number <= cap))
            .map(|p| p.receipt_hash)
            .collect();
        Ok(merkle_root_of(&leaves))
    }
}

fn compute_receipt_hash(previous_receipt_hash: Option<&str>, packet_hash: &str) -> String {
    match previous_receipt_hash {
        Some(prev) => {
            let msg = format!("{prev}:{packet_hash}");
            sha256_hex(msg.as_bytes())
        }
        None => packet_hash.to_string(),
    }
}

/// Binary Merkle root over `leaves`, pairwise `SHA-256(left || right)`
/// hex, duplicating the odd node out at each level (spec.md §4.7).
/// Returns `None` for an empty leaf set.
fn merkle_root_of(leaves: &[String]) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level.last().expect("non-empty").clone());
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let combined = format!("{}{}", pair[0], pair[1]);
                sha256_hex(combined.as_bytes())
            })
            .collect();
    }
    level.into_iter().next()
}

fn row_to_packet(row: &munin_storage::rusqlite::Row<'_>) -> munin_storage::rusqlite::Result<MuninResult<Packet>> {
    let packet_id: String = row.get(0)?;
    let decision_id: String = row.get(1)?;
    let namespace: String = row.get(2)?;
    let previous_receipt_hash: Option<String> = row.get(3)?;
    let packet_hash: String = row.get(4)?;
    let receipt_hash: String = row.get(5)?;
    let sequence_number: i64 = row.get(6)?;
    let content_json: String = row.get(7)?;
    let created_raw: String = row.get(8)?;

    Ok((|| {
        let parsed_json: serde_json::Value = serde_json::from_str(&content_json)
            .map_err(|e| Error::Encoding(format!("corrupt packet content: {e}")))?;
        let content = JsonValue::try_from(parsed_json)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_raw)
            .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(Packet {
            packet_id,
            decision_id,
            namespace,
            previous_receipt_hash,
            packet_hash,
            receipt_hash,
            sequence_number,
            content,
            created_at,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use munin_decisions::{DecisionPolicy, DecisionStatus};
    use munin_keys::{KeyRegistry, Role};

    fn setup() -> (PacketLog, Arc<DecisionEngine>, Arc<KeyRegistry>, Arc<AuditLog>) {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let audit = Arc::new(AuditLog::new(storage.clone()));
        let keys = Arc::new(KeyRegistry::new(storage.clone(), audit.clone()));
        let decisions = Arc::new(DecisionEngine::new(storage.clone(), audit.clone(), keys.clone()));
        let packets = PacketLog::new(storage.clone(), audit.clone(), decisions.clone());
        (packets, decisions, keys, audit)
    }

    fn authorized_decision(decisions: &DecisionEngine, keys: &KeyRegistry, decision_id: &str) {
        use ed25519_dalek::{Signer, SigningKey};
        use rand_core::OsRng;

        let signing_key = SigningKey::generate(&mut OsRng);
        let pubkey_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            signing_key.verifying_key().to_bytes(),
        );
        keys.register_user("u1", "u1", Role::Operator, &pubkey_b64, "k1", "hash")
            .unwrap();

        let policy = DecisionPolicy {
            threshold: 1,
            required: 1,
            signers: vec!["u1".to_string()],
        };
        decisions
            .create_decision(
                decision_id,
                "incident-1",
                "playbook-1",
                None,
                "ISOLATE_FEEDER",
                JsonValue::object([("feeder".to_string(), JsonValue::string("F12"))]),
                policy,
                None,
            )
            .unwrap();

        let message = munin_decisions::canonical_decision_message(
            &decisions.get_decision(decision_id).unwrap().decision,
        )
        .unwrap();
        let signature = signing_key.sign(message.as_bytes());
        let signature_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            signature.to_bytes(),
        );
        decisions
            .submit_signature(
                decision_id,
                "u1",
                &signature_b64,
                "k1",
                "ISOLATE_FEEDER",
                &JsonValue::object([("feeder".to_string(), JsonValue::string("F12"))]),
            )
            .unwrap();
    }

    #[test]
    fn first_packet_in_namespace_has_no_previous_receipt() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");

        let packet = packets
            .issue_packet("d1", None, JsonValue::object([]))
            .unwrap();

        assert!(packet.previous_receipt_hash.is_none());
        assert_eq!(packet.receipt_hash, packet.packet_hash);
        assert_eq!(packet.namespace, GLOBAL_NAMESPACE);
        assert_eq!(packet.sequence_number, 1);
    }

    #[test]
    fn issuing_a_packet_executes_its_decision() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        packets
            .issue_packet("d1", None, JsonValue::object([]))
            .unwrap();

        let view = decisions.get_decision("d1").unwrap();
        assert_eq!(view.decision.status, DecisionStatus::Executed);
    }

    #[test]
    fn cannot_issue_packet_against_pending_decision() {
        let (packets, decisions, keys, _audit) = setup();
        keys.register_user("u1", "u1", Role::Operator, "pk", "k1", "hash")
            .unwrap();
        decisions
            .create_decision(
                "d1",
                "incident-1",
                "playbook-1",
                None,
                "ISOLATE_FEEDER",
                JsonValue::object([]),
                DecisionPolicy {
                    threshold: 1,
                    required: 1,
                    signers: vec!["u1".to_string()],
                },
                None,
            )
            .unwrap();

        let result = packets.issue_packet("d1", None, JsonValue::object([]));
        assert!(matches!(result, Err(Error::WrongState(_))));
    }

    #[test]
    fn second_packet_chains_to_the_first_receipt() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        authorized_decision(&decisions, &keys, "d2");

        let p1 = packets
            .issue_packet("d1", None, JsonValue::object([]))
            .unwrap();
        let p2 = packets
            .issue_packet("d2", None, JsonValue::object([]))
            .unwrap();

        assert_eq!(p2.previous_receipt_hash, Some(p1.receipt_hash.clone()));
        assert_ne!(p2.receipt_hash, p1.receipt_hash);
    }

    #[test]
    fn verify_chain_accepts_a_clean_chain() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        authorized_decision(&decisions, &keys, "d2");
        packets.issue_packet("d1", None, JsonValue::object([])).unwrap();
        packets.issue_packet("d2", None, JsonValue::object([])).unwrap();

        assert!(packets.verify_chain(GLOBAL_NAMESPACE).is_ok());
    }

    #[test]
    fn separate_namespaces_have_independent_chains() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        authorized_decision(&decisions, &keys, "d2");

        let p1 = packets
            .issue_packet("d1", Some("water"), JsonValue::object([]))
            .unwrap();
        let p2 = packets
            .issue_packet("d2", Some("power"), JsonValue::object([]))
            .unwrap();

        assert!(p1.previous_receipt_hash.is_none());
        assert!(p2.previous_receipt_hash.is_none());
    }

    #[test]
    fn merkle_root_is_none_for_empty_namespace() {
        let (packets, _decisions, _keys, _audit) = setup();
        assert_eq!(packets.merkle_root("empty", None).unwrap(), None);
    }

    #[test]
    fn merkle_root_is_deterministic_for_same_leaves() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        authorized_decision(&decisions, &keys, "d2");
        packets.issue_packet("d1", None, JsonValue::object([])).unwrap();
        packets.issue_packet("d2", None, JsonValue::object([])).unwrap();

        let r1 = packets.merkle_root(GLOBAL_NAMESPACE, None).unwrap();
        let r2 = packets.merkle_root(GLOBAL_NAMESPACE, None).unwrap();
        assert_eq!(r1, r2);
        assert!(r1.is_some());
    }

    #[test]
    fn merkle_root_changes_as_the_chain_grows() {
        let (packets, decisions, keys, _audit) = setup();
        authorized_decision(&decisions, &keys, "d1");
        authorized_decision(&decisions, &keys, "d2");
        packets.issue_packet("d1", None, JsonValue::object([])).unwrap();
        let r1 = packets.merkle_root(GLOBAL_NAMESPACE, None).unwrap();
        packets.issue_packet("d2", None, JsonValue::object([])).unwrap();
        let r2 = packets.merkle_root(GLOBAL_NAMESPACE, None).unwrap();

        assert_ne!(r1, r2);
    }
}
