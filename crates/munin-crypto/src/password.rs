//! Argon2id password hashing (spec.md §4.2). Parameters default to
//! the spec's floor (`memory>=64 MiB, iterations>=3, parallelism=4`);
//! the encoded PHC string carries its own parameters and salt, so a
//! future cost bump doesn't invalidate hashes written under the old
//! one. Verification goes through `password-hash`'s own constant-time
//! comparison — we never compare encoded strings ourselves.

use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Argon2Params {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum PasswordHashError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("password hashing failed: {0}")]
    HashFailed(String),
    #[error("stored password hash is malformed")]
    MalformedHash,
}

fn build_argon2(params: Argon2Params) -> Result<Argon2<'static>, PasswordHashError> {
    let p = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        None,
    )
    .map_err(|e| PasswordHashError::InvalidParams(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, p))
}

/// Hashes `password`, returning a self-describing PHC string
/// (algorithm, parameters, salt, and hash all encoded together).
pub fn hash_password(
    password: &str,
    params: Argon2Params,
) -> Result<String, PasswordHashError> {
    let argon2 = build_argon2(params)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordHashError::HashFailed(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verifies `password` against a previously produced PHC string.
/// Returns `false` for a non-matching password *or* a malformed
/// stored hash — callers that need to distinguish "never registered"
/// from "wrong password" must do so before calling this, since the
/// comparison itself must stay constant-time either way.
pub fn verify_password(password: &str, encoded_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded_hash) else {
        return false;
    };
    // Re-derive the Argon2 instance from the embedded params rather
    // than assuming our own defaults still apply — this is what lets
    // a later cost bump coexist with hashes written under the old one.
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
