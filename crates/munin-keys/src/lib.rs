//! User and key registry: registration, rotation, revocation, and
//! the immutable key-history that makes historical signatures
//! verifiable forever (spec.md §4.3, C3).

mod types;

pub use types::{Key, KeyStatus, Role, User, UserStatus};

use chrono::Utc;
use munin_audit::{AuditLog, KeyResolver};
use munin_canon::JsonValue;
use munin_error::{Error, MuninResult};
use munin_storage::{rusqlite::params, Storage};
use std::sync::Arc;
use tracing::info;

/// User + key registry (spec.md §4.3). Every mutating operation here
/// writes its own audit entry in the same transaction as the row
/// change, so `USER_REGISTERED`/`USER_KEY_ROTATED`/`KEY_REVOKED` are
/// never observed without the state change they describe having
/// already committed.
pub struct KeyRegistry {
    storage: Arc<Storage>,
    audit: Arc<AuditLog>,
}

impl KeyRegistry {
    pub fn new(storage: Arc<Storage>, audit: Arc<AuditLog>) -> Self {
        KeyRegistry { storage, audit }
    }

    /// Inserts a new user with an ACTIVE key, recording the key into
    /// history. `public_key` is base64-encoded 32 raw Ed25519 bytes
    /// (spec.md §3). `passphrase_hash` is an already-computed Argon2id
    /// PHC string (`munin_crypto::hash_password`) — this layer never
    /// sees the raw passphrase.
    pub fn register_user(
        &self,
        user_id: &str,
        name: &str,
        role: Role,
        public_key: &str,
        key_id: &str,
        passphrase_hash: &str,
    ) -> MuninResult<User> {
        self.storage.with_tx(|tx| {
            let exists: i64 = tx
                .query_row(
                    "SELECT count(*) FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(munin_storage::sql_err)?;
            if exists > 0 {
                return Err(Error::Conflict(format!("user already exists: {user_id}")));
            }

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO users (user_id, name, role, current_key_id, passphrase_hash, status, last_login_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                params![user_id, name, role.as_str(), key_id, passphrase_hash, UserStatus::Active.as_str()],
            )
            .map_err(munin_storage::sql_err)?;

            tx.execute(
                "INSERT INTO user_key_history (key_id, user_id, public_key, status, created_at, rotated_to_key_id, revoked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)",
                params![key_id, user_id, public_key, KeyStatus::Active.as_str(), created_at.to_rfc3339()],
            )
            .map_err(munin_storage::sql_err)?;

            let payload = JsonValue::object([
                ("user_id".to_string(), JsonValue::string(user_id)),
                ("name".to_string(), JsonValue::string(name)),
                ("role".to_string(), JsonValue::string(role.as_str())),
                ("key_id".to_string(), JsonValue::string(key_id)),
            ]);
            self.audit
                .append_in_tx(tx, "USER_REGISTERED", payload, None)?;

            info!(user_id, role = role.as_str(), "user registered");

            Ok(User {
                user_id: user_id.to_string(),
                name: name.to_string(),
                role,
                current_key_id: key_id.to_string(),
                status: UserStatus::Active,
                last_login_at: None,
            })
        })
    }

    /// Rotates `user_id`'s active key to `new_key_id`/`new_public_key`
    /// within a single transaction: the old history row becomes
    /// ROTATED (with `rotated_to_key_id` set), a new ACTIVE history
    /// row is inserted, and the user's `current_key_id` is updated
    /// (spec.md §4.3).
    pub fn rotate_key(
        &self,
        user_id: &str,
        new_public_key: &str,
        new_key_id: &str,
    ) -> MuninResult<Key> {
        self.storage.with_tx(|tx| {
            let current_key_id: String = tx
                .query_row(
                    "SELECT current_key_id FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(|_| Error::NotFound(format!("no such user: {user_id}")))?;

            let current_status: String = tx
                .query_row(
                    "SELECT status FROM user_key_history WHERE key_id = ?1",
                    params![current_key_id],
                    |row| row.get(0),
                )
                .map_err(munin_storage::sql_err)?;
            if current_status != KeyStatus::Active.as_str() {
                return Err(Error::InputInvalid(format!(
                    "current key {current_key_id} for user {user_id} is already {current_status}"
                )));
            }

            tx.execute(
                "UPDATE user_key_history SET status = ?1, rotated_to_key_id = ?2 WHERE key_id = ?3",
                params![KeyStatus::Rotated.as_str(), new_key_id, current_key_id],
            )
            .map_err(munin_storage::sql_err)?;

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO user_key_history (key_id, user_id, public_key, status, created_at, rotated_to_key_id, revoked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)",
                params![new_key_id, user_id, new_public_key, KeyStatus::Active.as_str(), created_at.to_rfc3339()],
            )
            .map_err(munin_storage::sql_err)?;

            tx.execute(
                "UPDATE users SET current_key_id = ?1 WHERE user_id = ?2",
                params![new_key_id, user_id],
            )
            .map_err(munin_storage::sql_err)?;

            let payload = JsonValue::object([
                ("user_id".to_string(), JsonValue::string(user_id)),
                ("old_key_id".to_string(), JsonValue::string(&current_key_id)),
                ("new_key_id".to_string(), JsonValue::string(new_key_id)),
            ]);
            self.audit
                .append_in_tx(tx, "USER_KEY_ROTATED", payload, None)?;

            info!(user_id, new_key_id, "user key rotated");

            Ok(Key {
                key_id: new_key_id.to_string(),
                user_id: user_id.to_string(),
                public_key: new_public_key.to_string(),
                status: KeyStatus::Active,
                created_at,
                rotated_to_key_id: None,
                revoked_at: None,
            })
        })
    }

    /// Revokes `key_id`, whether or not it is still the user's
    /// current active key (spec.md §4.3). After revocation,
    /// `new_authorization_allowed` returns false for this key, but
    /// past signatures made while it was active remain verifiable
    /// (the history row is never deleted).
    pub fn revoke_key(&self, user_id: &str, key_id: &str) -> MuninResult<()> {
        self.storage.with_tx(|tx| {
            let owner: String = tx
                .query_row(
                    "SELECT user_id FROM user_key_history WHERE key_id = ?1",
                    params![key_id],
                    |row| row.get(0),
                )
                .map_err(|_| Error::NotFound(format!("no such key: {key_id}")))?;
            if owner != user_id {
                return Err(Error::NotFound(format!(
                    "key {key_id} does not belong to user {user_id}"
                )));
            }

            let revoked_at = Utc::now();
            let updated = tx
                .execute(
                    "UPDATE user_key_history SET status = ?1, revoked_at = ?2 WHERE key_id = ?3 AND status != ?4",
                    params![
                        KeyStatus::Revoked.as_str(),
                        revoked_at.to_rfc3339(),
                        key_id,
                        KeyStatus::Revoked.as_str()
                    ],
                )
                .map_err(munin_storage::sql_err)?;
            if updated == 0 {
                return Err(Error::InputInvalid(format!("key {key_id} already revoked")));
            }

            let payload = JsonValue::object([
                ("user_id".to_string(), JsonValue::string(user_id)),
                ("key_id".to_string(), JsonValue::string(key_id)),
            ]);
            self.audit.append_in_tx(tx, "KEY_REVOKED", payload, None)?;

            info!(user_id, key_id, "key revoked");
            Ok(())
        })
    }

    /// Looks up a user by id.
    pub fn get_user(&self, user_id: &str) -> MuninResult<User> {
        self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, name, role, current_key_id, status, last_login_at FROM users WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
            .map_err(|_| Error::NotFound(format!("no such user: {user_id}")))?
        })
    }

    /// Lists every registered user.
    pub fn list_users(&self) -> MuninResult<Vec<User>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user_id, name, role, current_key_id, status, last_login_at FROM users ORDER BY user_id ASC")
                .map_err(munin_storage::sql_err)?;
            let rows = stmt
                .query_map([], row_to_user)
                .map_err(munin_storage::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(munin_storage::sql_err)??);
            }
            Ok(out)
        })
    }

    /// Updates mutable user fields. `None` leaves a field untouched.
    pub fn update_user(
        &self,
        user_id: &str,
        role: Option<Role>,
        status: Option<UserStatus>,
        new_passphrase_hash: Option<&str>,
    ) -> MuninResult<User> {
        self.storage.with_tx(|tx| {
            let exists: i64 = tx
                .query_row(
                    "SELECT count(*) FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(munin_storage::sql_err)?;
            if exists == 0 {
                return Err(Error::NotFound(format!("no such user: {user_id}")));
            }
            if let Some(role) = role {
                tx.execute(
                    "UPDATE users SET role = ?1 WHERE user_id = ?2",
                    params![role.as_str(), user_id],
                )
                .map_err(munin_storage::sql_err)?;
            }
            if let Some(status) = status {
                tx.execute(
                    "UPDATE users SET status = ?1 WHERE user_id = ?2",
                    params![status.as_str(), user_id],
                )
                .map_err(munin_storage::sql_err)?;
            }
            if let Some(hash) = new_passphrase_hash {
                tx.execute(
                    "UPDATE users SET passphrase_hash = ?1 WHERE user_id = ?2",
                    params![hash, user_id],
                )
                .map_err(munin_storage::sql_err)?;
            }
            tx.query_row(
                "SELECT user_id, name, role, current_key_id, status, last_login_at FROM users WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
            .map_err(munin_storage::sql_err)?
        })
    }

    /// The stored Argon2id PHC string for `user_id` — consulted only
    /// by `munin-auth::login`, never logged or returned over the wire.
    pub fn get_passphrase_hash(&self, user_id: &str) -> MuninResult<String> {
        self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT passphrase_hash FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(|_| Error::NotFound(format!("no such user: {user_id}")))
        })
    }

    /// Records a successful login's timestamp. Called by `munin-auth`
    /// after the password check succeeds.
    pub fn record_login(&self, user_id: &str) -> MuninResult<()> {
        self.storage.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE user_id = ?2",
                params![Utc::now().to_rfc3339(), user_id],
            )
            .map_err(munin_storage::sql_err)?;
            Ok(())
        })
    }

    /// Reads the base64 public key for `key_id` from history — used
    /// both by `resolve_public_key` (the `KeyResolver` impl) and by
    /// callers that need the raw row, e.g. `new_authorization_allowed`.
    pub fn get_key(&self, key_id: &str) -> MuninResult<Key> {
        self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT key_id, user_id, public_key, status, created_at, rotated_to_key_id, revoked_at FROM user_key_history WHERE key_id = ?1",
                params![key_id],
                row_to_key,
            )
            .map_err(|_| Error::NotFound(format!("no such key: {key_id}")))?
        })
    }

    /// The full, ordered key history for a user (newest last) —
    /// supports the supplemented key-history listing (SPEC_FULL.md §E.5).
    pub fn key_history(&self, user_id: &str) -> MuninResult<Vec<Key>> {
        self.storage.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key_id, user_id, public_key, status, created_at, rotated_to_key_id, revoked_at FROM user_key_history WHERE user_id = ?1 ORDER BY created_at ASC")
                .map_err(munin_storage::sql_err)?;
            let rows = stmt
                .query_map(params![user_id], row_to_key)
                .map_err(munin_storage::sql_err)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(munin_storage::sql_err)??);
            }
            Ok(out)
        })
    }

    /// True iff `key_id` is currently ACTIVE — the gate `munin-decisions`
    /// consults before accepting a new signature (spec.md §4.5
    /// `KeyNotActive`) and `rotate_key`'s own precondition.
    pub fn new_authorization_allowed(&self, key_id: &str) -> MuninResult<bool> {
        let key = self.get_key(key_id)?;
        Ok(key.status == KeyStatus::Active)
    }
}

impl KeyResolver for KeyRegistry {
    /// Reads from history, not the user's current key, so a signature
    /// made while a key was active stays verifiable after rotation or
    /// revocation (spec.md §4.3, §8 property 6).
    fn resolve_public_key(&self, key_id: &str) -> MuninResult<String> {
        self.get_key(key_id).map(|k| k.public_key)
    }
}

fn row_to_user(row: &munin_storage::rusqlite::Row<'_>) -> munin_storage::rusqlite::Result<MuninResult<User>> {
    let user_id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let role_raw: String = row.get(2)?;
    let current_key_id: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let last_login_raw: Option<String> = row.get(5)?;

    Ok((|| {
        let role = Role::parse(&role_raw)
            .map_err(|_| Error::StorageFailure(format!("corrupt role: {role_raw}")))?;
        let status = UserStatus::parse(&status_raw)?;
        let last_login_at = match last_login_raw {
            Some(raw) => Some(
                chrono::DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(User {
            user_id,
            name,
            role,
            current_key_id,
            status,
            last_login_at,
        })
    })())
}

fn row_to_key(row: &munin_storage::rusqlite::Row<'_>) -> munin_storage::rusqlite::Result<MuninResult<Key>> {
    let key_id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let public_key: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let created_raw: String = row.get(4)?;
    let rotated_to_key_id: Option<String> = row.get(5)?;
    let revoked_raw: Option<String> = row.get(6)?;

    Ok((|| {
        let status = KeyStatus::parse(&status_raw)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_raw)
            .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc);
        let revoked_at = match revoked_raw {
            Some(raw) => Some(
                chrono::DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| Error::StorageFailure(format!("corrupt timestamp: {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(Key {
            key_id,
            user_id,
            public_key,
            status,
            created_at,
            rotated_to_key_id,
            revoked_at,
        })
    })())
}
