//! Tamper-evident append-only audit log (spec.md §4.4, C4).

mod log;
mod types;

pub use log::AuditLog;
pub use types::{AuditEntry, AuditQuery, ChainVerification, Checkpoint, EntrySigner, KeyResolver};

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use munin_canon::JsonValue;
    use munin_storage::Storage;
    use rand_core::OsRng;
    use std::sync::Arc;

    struct StubResolver {
        key_id: String,
        public_key_b64: String,
    }

    impl KeyResolver for StubResolver {
        fn resolve_public_key(&self, key_id: &str) -> munin_error::MuninResult<String> {
            if key_id == self.key_id {
                Ok(self.public_key_b64.clone())
            } else {
                Err(munin_error::Error::NotFound(format!("no such key {key_id}")))
            }
        }
    }

    fn payload(n: i64) -> JsonValue {
        JsonValue::object([("n".to_string(), JsonValue::Number(n.into()))])
    }

    #[test]
    fn first_entry_has_null_prev_hash() {
        let log = AuditLog::new(Arc::new(Storage::in_memory().unwrap()));
        let e = log.append("GENESIS", payload(1), None).unwrap();
        assert_eq!(e.sequence_number, 1);
        assert!(e.prev_hash.is_none());
    }

    #[test]
    fn chain_closure_holds_across_appends() {
        let log = AuditLog::new(Arc::new(Storage::in_memory().unwrap()));
        let e1 = log.append("A", payload(1), None).unwrap();
        let e2 = log.append("B", payload(2), None).unwrap();
        let e3 = log.append("C", payload(3), None).unwrap();

        assert_eq!(e2.prev_hash.as_deref(), Some(e1.entry_hash.as_str()));
        assert_eq!(e3.prev_hash.as_deref(), Some(e2.entry_hash.as_str()));
        assert_eq!(e1.sequence_number, 1);
        assert_eq!(e2.sequence_number, 2);
        assert_eq!(e3.sequence_number, 3);
    }

    #[test]
    fn verify_chain_reports_valid_for_untampered_log() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage.clone());
        log.append("A", payload(1), None).unwrap();
        log.append("B", payload(2), None).unwrap();

        let resolver = StubResolver {
            key_id: "unused".into(),
            public_key_b64: String::new(),
        };
        let result = log.verify_chain(None, None, &resolver).unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.entries_checked, 2);
    }

    #[test]
    fn verify_chain_detects_tampered_payload() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage.clone());
        log.append("A", payload(1), None).unwrap();
        log.append("B", payload(2), None).unwrap();

        storage
            .with_tx(|tx| {
                tx.execute(
                    "UPDATE audit_log SET payload_json = '{\"n\":999}' WHERE sequence_number = 1",
                    [],
                )
                .map_err(munin_storage::sql_err)
            })
            .unwrap();

        let resolver = StubResolver {
            key_id: "unused".into(),
            public_key_b64: String::new(),
        };
        let result = log.verify_chain(None, None, &resolver).unwrap();
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, munin_error::Error::HashMismatch { seq: 1, .. })));
        // The tamper also breaks the chain link into entry 2, since
        // entry 2's prev_hash was computed against the original
        // entry 1 hash.
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, munin_error::Error::AuditChainBroken { seq: 2 })));
    }

    #[test]
    fn appends_after_detected_corruption_still_succeed() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage.clone());
        log.append("A", payload(1), None).unwrap();

        storage
            .with_tx(|tx| {
                tx.execute(
                    "UPDATE audit_log SET payload_json = '{\"n\":999}' WHERE sequence_number = 1",
                    [],
                )
                .map_err(munin_storage::sql_err)
            })
            .unwrap();

        // The log stays operable even though its own head is corrupt.
        let appended = log.append("B", payload(2), None);
        assert!(appended.is_ok());

        let resolver = StubResolver {
            key_id: "unused".into(),
            public_key_b64: String::new(),
        };
        let result = log.verify_chain(None, None, &resolver).unwrap();
        assert!(!result.valid, "corruption persists until acknowledged out of band");
    }

    #[test]
    fn signed_entry_verifies_against_the_resolved_key() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage);
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key_b64 = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode(signing_key.verifying_key().to_bytes())
        };

        let sign = |msg: &[u8]| signing_key.sign(msg).to_bytes().to_vec();
        let signer = EntrySigner {
            signer_id: "operator-1".into(),
            key_id: "key-1".into(),
            sign: &sign,
        };
        log.append("SIGNED_EVENT", payload(1), Some(signer)).unwrap();

        let resolver = StubResolver {
            key_id: "key-1".into(),
            public_key_b64,
        };
        let result = log.verify_chain(None, None, &resolver).unwrap();
        assert!(result.valid);
    }

    #[test]
    fn tampered_signature_is_detected() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage.clone());
        let signing_key = SigningKey::generate(&mut OsRng);
        let sign = |msg: &[u8]| signing_key.sign(msg).to_bytes().to_vec();
        let signer = EntrySigner {
            signer_id: "operator-1".into(),
            key_id: "key-1".into(),
            sign: &sign,
        };
        log.append("SIGNED_EVENT", payload(1), Some(signer)).unwrap();

        storage
            .with_tx(|tx| {
                tx.execute(
                    "UPDATE audit_log SET signer_id = 'operator-2' WHERE sequence_number = 1",
                    [],
                )
                .map_err(munin_storage::sql_err)
            })
            .unwrap();

        let public_key_b64 = {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode(signing_key.verifying_key().to_bytes())
        };
        let resolver = StubResolver {
            key_id: "key-1".into(),
            public_key_b64,
        };
        let result = log.verify_chain(None, None, &resolver).unwrap();
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, munin_error::Error::AuditSignatureInvalid { seq: 1 })));
    }

    #[test]
    fn export_checkpoint_binds_head_hash_and_seq() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage);
        let e1 = log.append("A", payload(1), None).unwrap();
        let checkpoint = log.export_checkpoint().unwrap();
        assert_eq!(checkpoint.sequence_number, 1);
        assert_eq!(checkpoint.chain_head_hash, e1.entry_hash);
    }

    #[test]
    fn export_checkpoint_fails_on_empty_log() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage);
        assert!(log.export_checkpoint().is_err());
    }

    #[test]
    fn list_filters_by_event_type() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let log = AuditLog::new(storage);
        log.append("LOGIN_OK", payload(1), None).unwrap();
        log.append("LOGIN_FAILED", payload(2), None).unwrap();
        log.append("LOGIN_OK", payload(3), None).unwrap();

        let q = AuditQuery {
            event_type: Some("LOGIN_OK".into()),
            ..Default::default()
        };
        let entries = log.list(q).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.event_type == "LOGIN_OK"));
    }
}
