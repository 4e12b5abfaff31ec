//! Process configuration (spec.md §6 "Environment variables"), read
//! once at startup and held immutably for the process lifetime.

use anyhow::{Context, Result};
use rand::RngCore;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Session lifetime, in hours, from issuance.
    pub session_ttl_hours: i64,

    /// HMAC key for session-token hashing. Generated on first boot
    /// and persisted alongside the database so a restart doesn't
    /// invalidate every live session.
    pub session_secret: Vec<u8>,

    /// Sliding window, in minutes, over which recent `LOGIN_FAILED`
    /// entries are counted for rate limiting.
    pub login_attempt_window_minutes: i64,

    /// Failures within the window before `POST /login` returns
    /// `429 Locked`.
    pub login_attempt_limit: i64,

    /// Argon2id memory cost, in KiB.
    pub argon2_memory_kib: u32,

    /// Argon2id iteration count.
    pub argon2_iterations: u32,

    /// Argon2id parallelism degree.
    pub argon2_parallelism: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/munin.db".into())
            .into();

        let session_secret = load_or_generate_secret(&database_path)
            .context("failed to load or generate SESSION_SECRET")?;

        Ok(Config {
            database_path,
            host: std::env::var("MUNIN_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("MUNIN_PORT")
                .unwrap_or_else(|_| "8443".into())
                .parse()
                .context("invalid MUNIN_PORT")?,
            session_ttl_hours: std::env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "8".into())
                .parse()
                .context("invalid SESSION_TTL_HOURS")?,
            session_secret,
            login_attempt_window_minutes: std::env::var("LOGIN_ATTEMPT_WINDOW_MINUTES")
                .unwrap_or_else(|_| "15".into())
                .parse()
                .context("invalid LOGIN_ATTEMPT_WINDOW_MINUTES")?,
            login_attempt_limit: std::env::var("LOGIN_ATTEMPT_LIMIT")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .context("invalid LOGIN_ATTEMPT_LIMIT")?,
            argon2_memory_kib: std::env::var("ARGON2_MEMORY_KIB")
                .unwrap_or_else(|_| "65536".into())
                .parse()
                .context("invalid ARGON2_MEMORY_KIB")?,
            argon2_iterations: std::env::var("ARGON2_ITERATIONS")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .context("invalid ARGON2_ITERATIONS")?,
            argon2_parallelism: std::env::var("ARGON2_PARALLELISM")
                .unwrap_or_else(|_| "4".into())
                .parse()
                .context("invalid ARGON2_PARALLELISM")?,
        })
    }

    pub fn argon2_params(&self) -> munin_crypto::Argon2Params {
        munin_crypto::Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

/// `SESSION_SECRET` is either taken verbatim from the environment, or
/// read from `<database_path>.session_secret` next to the DB file, or
/// generated fresh and written there — so sessions issued before a
/// restart stay valid afterward.
fn load_or_generate_secret(database_path: &PathBuf) -> Result<Vec<u8>> {
    if let Ok(raw) = std::env::var("SESSION_SECRET") {
        return Ok(raw.into_bytes());
    }

    let secret_path = secret_path_for(database_path);
    if let Ok(existing) = std::fs::read(&secret_path) {
        if !existing.is_empty() {
            return Ok(existing);
        }
    }

    if let Some(parent) = secret_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let mut secret = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    std::fs::write(&secret_path, &secret)
        .with_context(|| format!("writing {}", secret_path.display()))?;
    Ok(secret)
}

fn secret_path_for(database_path: &PathBuf) -> PathBuf {
    let mut path = database_path.clone().into_os_string();
    path.push(".session_secret");
    path.into()
}
