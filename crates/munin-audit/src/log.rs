use crate::types::{AuditEntry, AuditQuery, ChainVerification, Checkpoint, EntrySigner, KeyResolver};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use munin_canon::{canonicalize, JsonValue};
use munin_crypto::{sha256_hex, verify_signature};
use munin_error::{Error, MuninResult};
use munin_storage::{rusqlite::params, rusqlite::Transaction, Storage};
use std::sync::Arc;
use tracing::{info, warn};

/// The append-only hash-chained audit log (spec.md §4.4, C4).
pub struct AuditLog {
    storage: Arc<Storage>,
}

impl AuditLog {
    pub fn new(storage: Arc<Storage>) -> Self {
        AuditLog { storage }
    }

    /// Appends one entry in its own transaction. Computes `entry_hash`
    /// under the storage write lock so the read of the current head
    /// and the insert of the new row are atomic with respect to every
    /// other writer (spec.md §5) — no two concurrent appends can
    /// observe the same `prev_hash` and disagree about who goes
    /// first.
    pub fn append(
        &self,
        event_type: &str,
        payload: JsonValue,
        signer: Option<EntrySigner<'_>>,
    ) -> MuninResult<AuditEntry> {
        self.storage
            .with_tx(|tx| self.append_in_tx(tx, event_type, payload, signer))
    }

    /// The same append, but inside a transaction the caller already
    /// holds — used when an audit entry must commit atomically with
    /// the entity write that produced it (spec.md §4.3's
    /// `rotate_key`, §4.5's threshold-crossing signature submission,
    /// all "within the same transaction" per the spec). The caller is
    /// responsible for committing; `append_in_tx` never does.
    pub fn append_in_tx(
        &self,
        tx: &Transaction,
        event_type: &str,
        payload: JsonValue,
        signer: Option<EntrySigner<'_>>,
    ) -> MuninResult<AuditEntry> {
        let canonical_payload =
            canonicalize(&payload).map_err(|e| Error::Encoding(e.to_string()))?;
        let ts = Utc::now();

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT sequence_number, entry_hash FROM audit_log ORDER BY sequence_number DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional_or_storage_err()?;

        let (seq, prev_hash) = match head {
            Some((last_seq, last_hash)) => (last_seq + 1, Some(last_hash)),
            None => (1, None),
        };

        let entry_hash = compute_entry_hash(&canonical_payload, prev_hash.as_deref());

        let (signer_id, key_id, signature) = match &signer {
            Some(s) => {
                let message = format!("{entry_hash}:{}:{}", s.signer_id, s.key_id);
                let sig = (s.sign)(message.as_bytes());
                (
                    Some(s.signer_id.clone()),
                    Some(s.key_id.clone()),
                    Some(BASE64.encode(sig)),
                )
            }
            None => (None, None, None),
        };

        tx.execute(
            "INSERT INTO audit_log (sequence_number, ts, event_type, payload_json, prev_hash, entry_hash, signer_id, signature, key_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                seq,
                ts.to_rfc3339(),
                event_type,
                canonical_payload,
                prev_hash,
                entry_hash,
                signer_id,
                signature,
                key_id,
            ],
        )
        .map_err(munin_storage::sql_err)?;

        info!(seq, event_type, "audit entry appended");

        Ok(AuditEntry {
            sequence_number: seq,
            ts,
            event_type: event_type.to_string(),
            payload,
            canonical_payload,
            prev_hash,
            entry_hash,
            signer_id,
            signature,
            key_id,
        })
    }

    /// Same as `append`, but attributes the entry to `signer_id`
    /// without a cryptographic signature — used for events like
    /// `LOGIN_OK`/`LOGIN_FAILED` where the actor is known but there is
    /// no decision or key material to sign over yet. `munin-auth`'s
    /// rate limiter scans these by `signer_id` (spec.md §4.6).
    pub fn append_attributed(
        &self,
        event_type: &str,
        payload: JsonValue,
        signer_id: &str,
    ) -> MuninResult<AuditEntry> {
        self.storage
            .with_tx(|tx| self.append_attributed_in_tx(tx, event_type, payload, signer_id))
    }

    pub fn append_attributed_in_tx(
        &self,
        tx: &Transaction,
        event_type: &str,
        payload: JsonValue,
        signer_id: &str,
    ) -> MuninResult<AuditEntry> {
        let canonical_payload =
            canonicalize(&payload).map_err(|e| Error::Encoding(e.to_string()))?;
        let ts = Utc::now();

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT sequence_number, entry_hash FROM audit_log ORDER BY sequence_number DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional_or_storage_err()?;

        let (seq, prev_hash) = match head {
            Some((last_seq, last_hash)) => (last_seq + 1, Some(last_hash)),
            None => (1, None),
        };

        let entry_hash = compute_entry_hash(&canonical_payload, prev_hash.as_deref());

        tx.execute(
            "INSERT INTO audit_log (sequence_number, ts, event_type, payload_json, prev_hash, entry_hash, signer_id, signature, key_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL)",
            params![
                seq,
                ts.to_rfc3339(),
                event_type,
                canonical_payload,
                prev_hash,
                entry_hash,
                signer_id,
            ],
        )
        .map_err(munin_storage::sql_err)?;

        info!(seq, event_type, signer_id, "audit entry appended");

        Ok(AuditEntry {
            sequence_number: seq,
            ts,
            event_type: event_type.to_string(),
            payload,
            canonical_payload,
            prev_hash,
            entry_hash,
            signer_id: Some(signer_id.to_string()),
            signature: None,
            key_id: None,
        })
    }

    /// Lists entries matching `query`, most recent last (ascending by
    /// sequence number) — the natural order to read a chain in.
    pub fn list(&self, query: AuditQuery) -> MuninResult<Vec<AuditEntry>> {
        let query = query.normalized();
        self.storage.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT sequence_number, ts, event_type, payload_json, prev_hash, entry_hash, signer_id, signature, key_id FROM audit_log WHERE 1=1",
            );
            if query.event_type.is_some() {
                sql.push_str(" AND event_type = ?1");
            }
            if query.signer_id.is_some() {
                sql.push_str(if query.event_type.is_some() {
                    " AND signer_id = ?2"
                } else {
                    " AND signer_id = ?1"
                });
            }
            sql.push_str(" ORDER BY sequence_number ASC LIMIT ? OFFSET ?");

            let mut stmt = conn.prepare(&sql).map_err(munin_storage::sql_err)?;
            let rows = match (&query.event_type, &query.signer_id) {
                (Some(et), Some(sid)) => stmt.query_map(
                    params![et, sid, query.limit, query.offset],
                    row_to_entry,
                ),
                (Some(et), None) => {
                    stmt.query_map(params![et, query.limit, query.offset], row_to_entry)
                }
                (None, Some(sid)) => {
                    stmt.query_map(params![sid, query.limit, query.offset], row_to_entry)
                }
                (None, None) => stmt.query_map(params![query.limit, query.offset], row_to_entry),
            }
            .map_err(munin_storage::sql_err)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(munin_storage::sql_err)??);
            }
            Ok(out)
        })
    }

    /// Re-derives every `entry_hash` and chain link in
    /// `[from_seq, to_seq]` (inclusive, defaulting to the full chain)
    /// and, where a signature is present, re-verifies it against
    /// `resolver`. Read-only: corruption is *reported*, never
    /// repaired (spec.md §4.4).
    pub fn verify_chain(
        &self,
        from_seq: Option<i64>,
        to_seq: Option<i64>,
        resolver: &dyn KeyResolver,
    ) -> MuninResult<ChainVerification> {
        let from_seq = from_seq.unwrap_or(1);
        let to_seq = to_seq.unwrap_or(i64::MAX);

        self.storage.with_conn(|conn| {
            let mut errors = Vec::new();

            // Fetch the boundary predecessor when the range doesn't
            // start at the genesis entry, so the link at the range's
            // edge is still validated (spec.md §4.4 ties `prev_hash`
            // to the *actual* previous entry, not just the queried
            // window).
            let mut expected_prev: Option<String> = if from_seq > 1 {
                let prior: Option<String> = conn
                    .query_row(
                        "SELECT entry_hash FROM audit_log WHERE sequence_number = ?1",
                        params![from_seq - 1],
                        |row| row.get(0),
                    )
                    .optional_or_storage_err()?;
                match prior {
                    Some(h) => Some(h),
                    None => {
                        errors.push(Error::AuditChainBroken { seq: from_seq });
                        None
                    }
                }
            } else {
                None
            };

            let mut stmt = conn
                .prepare(
                    "SELECT sequence_number, ts, event_type, payload_json, prev_hash, entry_hash, signer_id, signature, key_id
                     FROM audit_log WHERE sequence_number BETWEEN ?1 AND ?2 ORDER BY sequence_number ASC",
                )
                .map_err(munin_storage::sql_err)?;
            let rows = stmt
                .query_map(params![from_seq, to_seq], row_to_entry)
                .map_err(munin_storage::sql_err)?;

            let mut entries_checked = 0i64;
            for row in rows {
                let entry = row.map_err(munin_storage::sql_err)??;
                entries_checked += 1;

                if entry.sequence_number == 1 && entry.prev_hash.is_some() {
                    errors.push(Error::GenesisPrevHash);
                }

                let recomputed =
                    compute_entry_hash(&entry.canonical_payload, entry.prev_hash.as_deref());
                if recomputed != entry.entry_hash {
                    errors.push(Error::HashMismatch {
                        seq: entry.sequence_number,
                        expected: recomputed,
                        got: entry.entry_hash.clone(),
                    });
                }

                if entry.sequence_number > 1 {
                    if let Some(expected) = &expected_prev {
                        if entry.prev_hash.as_deref() != Some(expected.as_str()) {
                            errors.push(Error::AuditChainBroken {
                                seq: entry.sequence_number,
                            });
                        }
                    }
                }

                if let (Some(signer_id), Some(signature_b64), Some(key_id)) =
                    (&entry.signer_id, &entry.signature, &entry.key_id)
                {
                    let valid = resolver
                        .resolve_public_key(key_id)
                        .ok()
                        .map(|pubkey| {
                            let message = format!("{}:{}:{}", entry.entry_hash, signer_id, key_id);
                            let sig_bytes = BASE64.decode(signature_b64).unwrap_or_default();
                            verify_signature(&pubkey, message.as_bytes(), &sig_bytes)
                        })
                        .unwrap_or(false);
                    if !valid {
                        errors.push(Error::AuditSignatureInvalid {
                            seq: entry.sequence_number,
                        });
                    }
                }

                expected_prev = Some(entry.entry_hash);
            }

            if !errors.is_empty() {
                warn!(count = errors.len(), "audit chain verification found corruption");
            }

            Ok(ChainVerification {
                valid: errors.is_empty(),
                errors,
                entries_checked,
            })
        })
    }

    /// Snapshots the current head and appends a new, immutable
    /// checkpoint row. Fails if the log is empty — there is no head
    /// to snapshot yet.
    pub fn export_checkpoint(&self) -> MuninResult<Checkpoint> {
        self.storage.with_tx(|tx| {
            let head: Option<(i64, String)> = tx
                .query_row(
                    "SELECT sequence_number, entry_hash FROM audit_log ORDER BY sequence_number DESC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional_or_storage_err()?;

            let (sequence_number, chain_head_hash) =
                head.ok_or_else(|| Error::NotFound("audit log is empty".into()))?;
            let timestamp = Utc::now();

            let snapshot = JsonValue::object([
                (
                    "chain_head_hash".to_string(),
                    JsonValue::string(chain_head_hash.clone()),
                ),
                (
                    "timestamp".to_string(),
                    JsonValue::string(timestamp.to_rfc3339()),
                ),
                (
                    "sequence_number".to_string(),
                    JsonValue::Number(sequence_number.into()),
                ),
            ]);
            let canonical = canonicalize(&snapshot).map_err(|e| Error::Encoding(e.to_string()))?;
            let checkpoint_hash = sha256_hex(canonical.as_bytes());

            tx.execute(
                "INSERT INTO checkpoints (chain_head_hash, ts, sequence_number, checkpoint_hash) VALUES (?1, ?2, ?3, ?4)",
                params![chain_head_hash, timestamp.to_rfc3339(), sequence_number, checkpoint_hash],
            )
            .map_err(munin_storage::sql_err)?;

            Ok(Checkpoint {
                chain_head_hash,
                timestamp,
                sequence_number,
                checkpoint_hash,
            })
        })
    }

    /// Counts `LOGIN_FAILED` entries for `operator_id` since `since`
    /// — the read path `munin-auth`'s rate limiter uses instead of a
    /// second side-table (spec.md §4.6, "Failures are drawn from
    /// audit events of type LOGIN_FAILED").
    pub fn count_recent_login_failures(
        &self,
        operator_id: &str,
        since: DateTime<Utc>,
    ) -> MuninResult<i64> {
        self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT count(*) FROM audit_log WHERE event_type = 'LOGIN_FAILED' AND signer_id = ?1 AND ts >= ?2",
                params![operator_id, since.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(munin_storage::sql_err)
        })
    }
}

fn compute_entry_hash(canonical_payload: &str, prev_hash: Option<&str>) -> String {
    match prev_hash {
        Some(prev) => {
            let mut msg = Vec::with_capacity(canonical_payload.len() + 1 + prev.len());
            msg.extend_from_slice(canonical_payload.as_bytes());
            msg.push(b':');
            msg.extend_from_slice(prev.as_bytes());
            sha256_hex(&msg)
        }
        None => sha256_hex(canonical_payload.as_bytes()),
    }
}

fn row_to_entry(row: &munin_storage::rusqlite::Row<'_>) -> munin_storage::rusqlite::Result<MuninResult<AuditEntry>> {
    let sequence_number: i64 = row.get(0)?;
    let ts_raw: String = row.get(1)?;
    let event_type: String = row.get(2)?;
    let canonical_payload: String = row.get(3)?;
    let prev_hash: Option<String> = row.get(4)?;
    let entry_hash: String = row.get(5)?;
    let signer_id: Option<String> = row.get(6)?;
    let signature: Option<String> = row.get(7)?;
    let key_id: Option<String> = row.get(8)?;

    Ok((|| {
        let ts = DateTime::parse_from_rfc3339(&ts_raw)
            .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        let parsed_json: serde_json::Value = serde_json::from_str(&canonical_payload)
            .map_err(|e| Error::StorageFailure(format!("corrupt payload: {e}")))?;
        let payload = JsonValue::try_from(parsed_json)?;
        Ok(AuditEntry {
            sequence_number,
            ts,
            event_type,
            payload,
            canonical_payload,
            prev_hash,
            entry_hash,
            signer_id,
            signature,
            key_id,
        })
    })())
}

/// Small ergonomics shim: turns rusqlite's `QueryReturnedNoRows` into
/// `Ok(None)` instead of an error, for the "maybe there's a head row
/// yet" queries above.
trait OptionalRow<T> {
    fn optional_or_storage_err(self) -> MuninResult<Option<T>>;
}

impl<T> OptionalRow<T> for Result<T, munin_storage::rusqlite::Error> {
    fn optional_or_storage_err(self) -> MuninResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(munin_storage::rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(munin_storage::sql_err(e)),
        }
    }
}
