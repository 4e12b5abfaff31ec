use crate::config::Config;
use munin_audit::AuditLog;
use munin_auth::{SessionManager, SessionPolicy};
use munin_decisions::DecisionEngine;
use munin_keys::KeyRegistry;
use munin_packets::PacketLog;
use munin_storage::Storage;
use std::sync::Arc;

/// Every handler's `State<AppState>` extraction — one `Arc` per
/// component, cloned cheaply per-request (spec.md §9: storage handle
/// and audit-head lock are the only process-wide mutable resources;
/// everything else here is a thin, cloneable handle onto them).
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub audit: Arc<AuditLog>,
    pub keys: Arc<KeyRegistry>,
    pub decisions: Arc<DecisionEngine>,
    pub packets: Arc<PacketLog>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn build(storage: Storage, config: Config) -> Self {
        let storage = Arc::new(storage);
        let audit = Arc::new(AuditLog::new(storage.clone()));
        let keys = Arc::new(KeyRegistry::new(storage.clone(), audit.clone()));
        let decisions = Arc::new(DecisionEngine::new(
            storage.clone(),
            audit.clone(),
            keys.clone(),
        ));
        let packets = Arc::new(PacketLog::new(
            storage.clone(),
            audit.clone(),
            decisions.clone(),
        ));
        let policy = SessionPolicy {
            secret: config.session_secret.clone(),
            ttl_hours: config.session_ttl_hours,
            login_attempt_window_minutes: config.login_attempt_window_minutes,
            login_attempt_limit: config.login_attempt_limit,
        };
        let sessions = Arc::new(SessionManager::new(
            storage.clone(),
            audit.clone(),
            keys.clone(),
            policy,
        ));

        AppState {
            storage,
            audit,
            keys,
            decisions,
            packets,
            sessions,
            config: Arc::new(config),
        }
    }
}
