//! Bearer-token sessions and rate-limited login (spec.md §4.6, C6).

use crate::types::{LoginSuccess, Session, SessionPolicy};
use chrono::{DateTime, Duration, Utc};
use munin_audit::AuditLog;
use munin_canon::JsonValue;
use munin_crypto::{hmac_token_hash, random_raw_token, verify_password};
use munin_error::{Error, MuninResult};
use munin_keys::{KeyRegistry, UserStatus};
use munin_storage::{rusqlite::params, Storage};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SessionManager {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
    keys: Arc<KeyRegistry>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        storage: Arc<Storage>,
        audit: Arc<AuditLog>,
        keys: Arc<KeyRegistry>,
        policy: SessionPolicy,
    ) -> Self {
        SessionManager {
            storage,
            audit,
            keys,
            policy,
        }
    }

    /// Authenticates `operator_id`/`passphrase`, rate-limited by a
    /// sliding window of recent `LOGIN_FAILED` audit events (spec.md
    /// §4.6, §8 property 8). A successful login does **not** reset
    /// the window — only the window's own elapsing does.
    pub fn login(
        &self,
        operator_id: &str,
        passphrase: &str,
        source_addr: Option<&str>,
    ) -> MuninResult<LoginSuccess> {
        let since = Utc::now() - Duration::minutes(self.policy.login_attempt_window_minutes);
        let recent_failures = self.audit.count_recent_login_failures(operator_id, since)?;
        if recent_failures >= self.policy.login_attempt_limit {
            warn!(operator_id, recent_failures, "login locked by rate limit");
            return Err(Error::Locked);
        }

        let user = match self.keys.get_user(operator_id) {
            Ok(u) => u,
            Err(_) => {
                self.record_failure(operator_id, "unknown_operator")?;
                return Err(Error::InvalidCredentials);
            }
        };

        if user.status == UserStatus::Disabled {
            self.record_failure(operator_id, "disabled")?;
            return Err(Error::Disabled);
        }

        let passphrase_hash = self.keys.get_passphrase_hash(operator_id)?;
        if !verify_password(passphrase, &passphrase_hash) {
            self.record_failure(operator_id, "bad_passphrase")?;
            return Err(Error::InvalidCredentials);
        }

        let raw_token = random_raw_token();
        let token_hash = hmac_token_hash(&self.policy.secret, &raw_token)
            .map_err(|e| Error::Internal(format!("token hashing failed: {e}")))?;
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.policy.ttl_hours);
        let session_id = Uuid::new_v4().to_string();

        self.storage.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sessions (session_id, user_id, token_hash, created_at, expires_at, revoked_at, last_activity_at, source_addr)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
                params![session_id, operator_id, token_hash, now.to_rfc3339(), expires_at.to_rfc3339(), now.to_rfc3339(), source_addr],
            )
            .map_err(munin_storage::sql_err)?;

            let payload = JsonValue::object([(
                "operator_id".to_string(),
                JsonValue::string(operator_id),
            )]);
            self.audit
                .append_attributed_in_tx(tx, "LOGIN_OK", payload, operator_id)?;
            Ok(())
        })?;

        self.keys.record_login(operator_id)?;
        info!(operator_id, "login succeeded");

        Ok(LoginSuccess {
            token: raw_token,
            expires_at,
            role: user.role,
        })
    }

    fn record_failure(&self, operator_id: &str, reason: &'static str) -> MuninResult<()> {
        let payload = JsonValue::object([
            ("operator_id".to_string(), JsonValue::string(operator_id)),
            ("reason".to_string(), JsonValue::string(reason)),
        ]);
        self.audit
            .append_attributed("LOGIN_FAILED", payload, operator_id)?;
        warn!(operator_id, reason, "login failed");
        Ok(())
    }

    /// Resolves `raw_token` to a live `Session`, updating
    /// `last_activity_at`. Distinguishes `NotFound`/`Expired`/
    /// `Revoked`/`Disabled` via `Error::SessionInvalid { reason }`
    /// (spec.md §6 Authorization header contract).
    pub fn validate_session(&self, raw_token: &str) -> MuninResult<Session> {
        let token_hash = hmac_token_hash(&self.policy.secret, raw_token)
            .map_err(|_| Error::SessionInvalid { reason: "malformed" })?;

        let session = self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id, user_id, created_at, expires_at, revoked_at, last_activity_at, source_addr FROM sessions WHERE token_hash = ?1",
                params![token_hash],
                row_to_session,
            )
            .map_err(|_| Error::SessionInvalid { reason: "not_found" })?
        })?;

        if session.revoked_at.is_some() {
            return Err(Error::SessionInvalid { reason: "revoked" });
        }
        if Utc::now() > session.expires_at {
            return Err(Error::SessionInvalid { reason: "expired" });
        }

        let user = self.keys.get_user(&session.user_id)?;
        if user.status == UserStatus::Disabled {
            return Err(Error::SessionInvalid { reason: "disabled" });
        }

        let now = Utc::now();
        self.storage.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET last_activity_at = ?1 WHERE session_id = ?2",
                params![now.to_rfc3339(), session.session_id],
            )
            .map_err(munin_storage::sql_err)?;
            Ok(())
        })?;

        Ok(Session {
            last_activity_at: now,
            ..session
        })
    }

    /// Revokes a single session, e.g. on logout (spec.md §8 S8).
    pub fn revoke_session(&self, raw_token: &str) -> MuninResult<()> {
        let token_hash = hmac_token_hash(&self.policy.secret, raw_token)
            .map_err(|_| Error::SessionInvalid { reason: "malformed" })?;
        self.storage.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET revoked_at = ?1 WHERE token_hash = ?2 AND revoked_at IS NULL",
                    params![Utc::now().to_rfc3339(), token_hash],
                )
                .map_err(munin_storage::sql_err)?;
            if updated == 0 {
                return Err(Error::NotFound("no such active session".into()));
            }
            Ok(())
        })
    }

    /// Revokes every live session for a user — called when an account
    /// is disabled (spec.md §3 "Sessions ... destroyed by ... account
    /// disable").
    pub fn revoke_all_sessions_for_user(&self, user_id: &str) -> MuninResult<u64> {
        self.storage.with_conn(|conn| {
            let count = conn
                .execute(
                    "UPDATE sessions SET revoked_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
                    params![Utc::now().to_rfc3339(), user_id],
                )
                .map_err(munin_storage::sql_err)?;
            Ok(count as u64)
        })
    }
}

fn row_to_session(row: &munin_storage::rusqlite::Row<'_>) -> munin_storage::rusqlite::Result<MuninResult<Session>> {
    let session_id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let created_raw: String = row.get(2)?;
    let expires_raw: String = row.get(3)?;
    let revoked_raw: Option<String> = row.get(4)?;
    let last_activity_raw: String = row.get(5)?;
    let source_addr: Option<String> = row.get(6)?;

    Ok((|| {
        let parse = |raw: &str| -> MuninResult<DateTime<Utc>> {
            Ok(DateTime::parse_from_rfc3339(raw)
                .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
                .with_timezone(&Utc))
        };
        Ok(Session {
            session_id,
            user_id,
            created_at: parse(&created_raw)?,
            expires_at: parse(&expires_raw)?,
            revoked_at: revoked_raw.map(|r| parse(&r)).transpose()?,
            last_activity_at: parse(&last_activity_raw)?,
            source_addr,
        })
    })())
}
