//! End-to-end HTTP-surface tests for the scenarios in spec.md §8
//! (S1-S8), driven through the real `axum::Router` with an in-memory
//! SQLite handle — the workspace-level complement to the per-crate
//! `#[cfg(test)]` unit tests, covering wiring that no single crate's
//! unit tests exercise: routing, the bearer-auth middleware, and the
//! RBAC gate in `authz::require`.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use munin_server::config::Config;
use munin_server::router::build_router;
use munin_server::state::AppState;
use munin_storage::Storage;
use rand_core::OsRng;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        database_path: "test-only, never opened".into(),
        host: "127.0.0.1".into(),
        port: 0,
        session_ttl_hours: 8,
        session_secret: b"e2e-test-secret-do-not-reuse".to_vec(),
        login_attempt_window_minutes: 15,
        login_attempt_limit: 5,
        argon2_memory_kib: 19456,
        argon2_iterations: 1,
        argon2_parallelism: 1,
    }
}

/// Registers the first admin directly through the component layer,
/// the way an operator would seed a fresh deployment out-of-band
/// before any HTTP client can authenticate (there is no `/users`
/// endpoint until *someone* can already pass `authz::require(...,
/// "users", "create")`).
fn bootstrap(state: &AppState, user_id: &str, role: munin_keys::Role, passphrase: &str) -> SigningKey {
    let signing_key = SigningKey::generate(&mut OsRng);
    let pubkey_b64 = BASE64.encode(signing_key.verifying_key().to_bytes());
    let hash = munin_crypto::hash_password(passphrase, state.config.argon2_params()).unwrap();
    state
        .keys
        .register_user(
            user_id,
            user_id,
            role,
            &pubkey_b64,
            &format!("{user_id}-key-1"),
            &hash,
        )
        .unwrap();
    signing_key
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    let request = if let Some(b) = body {
        builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &axum::Router, operator_id: &str, passphrase: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/login",
        None,
        Some(json!({ "operator_id": operator_id, "passphrase": passphrase })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

fn sign_decision_message(signing_key: &SigningKey, message: &str) -> String {
    BASE64.encode(signing_key.sign(message.as_bytes()).to_bytes())
}

#[tokio::test]
async fn s2_one_of_one_authorization_through_the_http_surface() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    let admin_key = bootstrap(&state, "admin", munin_keys::Role::Admin, "admin-pass");
    let _ = admin_key;
    let operator_key = bootstrap(&state, "u1", munin_keys::Role::Operator, "u1-pass");
    let app = build_router(state);

    let operator_token = login(&app, "u1", "u1-pass").await;

    let (status, body) = send(
        &app,
        "POST",
        "/decisions",
        Some(&operator_token),
        Some(json!({
            "incident_id": "incident-1",
            "playbook_id": "playbook-1",
            "action_type": "shutdown",
            "scope": { "target": "valve-7" },
            "policy": { "threshold": 1, "required": 1, "signers": ["u1"] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create_decision failed: {body}");
    let decision_id = body["decision"]["decision_id"].as_str().unwrap().to_string();
    assert_eq!(body["decision"]["status"], "PENDING");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/decisions/{decision_id}"),
        Some(&operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let created_at = body["decision"]["created_at"].as_str().unwrap();
    let decision = munin_decisions::Decision {
        decision_id: decision_id.clone(),
        incident_id: "incident-1".into(),
        playbook_id: "playbook-1".into(),
        step_id: None,
        action_type: "shutdown".into(),
        scope: munin_canon::JsonValue::object([(
            "target".to_string(),
            munin_canon::JsonValue::string("valve-7"),
        )]),
        status: munin_decisions::DecisionStatus::Pending,
        policy: munin_decisions::DecisionPolicy {
            threshold: 1,
            required: 1,
            signers: vec!["u1".into()],
        },
        created_at: created_at.parse().unwrap(),
        authorized_at: None,
        previous_decision_hash: None,
    };
    let message = munin_decisions::canonical_decision_message(&decision).unwrap();
    let signature = sign_decision_message(&operator_key, &message);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/decisions/{decision_id}/sign"),
        Some(&operator_token),
        Some(json!({
            "signer_id": "u1",
            "signature": signature,
            "key_id": "u1-key-1",
            "action_type": "shutdown",
            "scope": { "target": "valve-7" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "sign_decision failed: {body}");
    assert_eq!(body["decision"]["status"], "AUTHORIZED");
    assert!(body["decision"]["authorized_at"].is_string());

    let (status, body) = send(&app, "GET", "/audit", Some(&operator_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["entries"].as_array().unwrap();
    let event_types: Vec<&str> = entries
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert!(event_types.contains(&"DECISION_CREATED"));
    assert!(event_types.contains(&"DECISION_SIGNED"));
    assert!(event_types.contains(&"DECISION_AUTHORIZED"));

    let (status, body) = send(
        &app,
        "POST",
        "/packets",
        Some(&operator_token),
        Some(json!({ "decision_id": decision_id, "body": { "evidence": "log-1" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "issue_packet failed: {body}");
    assert!(body["packet"]["previous_receipt_hash"].is_null());

    let (status, body) = send(
        &app,
        "POST",
        "/audit/verify",
        Some(&operator_token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn s7_login_rate_limit_over_http() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    bootstrap(&state, "op_x", munin_keys::Role::Operator, "correct horse");
    let app = build_router(state);

    for _ in 0..5 {
        let (status, _) = send(
            &app,
            "POST",
            "/login",
            None,
            Some(json!({ "operator_id": "op_x", "passphrase": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // 6th attempt, even with the right passphrase, is locked.
    let (status, body) = send(
        &app,
        "POST",
        "/login",
        None,
        Some(json!({ "operator_id": "op_x", "passphrase": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
}

#[tokio::test]
async fn s8_session_lifecycle_login_then_revoke_then_401() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    bootstrap(&state, "op_x", munin_keys::Role::Operator, "correct horse");
    let app = build_router(state);

    let token = login(&app, "op_x", "correct horse").await;

    let (status, _) = send(&app, "GET", "/decisions/does-not-exist", Some(&token), None).await;
    // Authenticated and permitted, just no such decision — proves the
    // token is live before we revoke it.
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = send(&app, "GET", "/decisions/does-not-exist", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "session invalid: revoked");
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_before_any_handler_runs() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    let app = build_router(state);

    let (status, _) = send(&app, "GET", "/audit", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn viewer_role_cannot_create_decisions() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    bootstrap(&state, "v1", munin_keys::Role::Viewer, "v1-pass");
    let app = build_router(state);

    let token = login(&app, "v1", "v1-pass").await;
    let (status, body) = send(
        &app,
        "POST",
        "/decisions",
        Some(&token),
        Some(json!({
            "incident_id": "incident-1",
            "playbook_id": "playbook-1",
            "action_type": "shutdown",
            "scope": {},
            "policy": { "threshold": 1, "required": 1, "signers": ["v1"] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"], "PermissionDenied");
}

#[tokio::test]
async fn s5_revoked_key_rejects_new_signature_over_http() {
    let state = AppState::build(Storage::in_memory().unwrap(), test_config());
    let operator_key = bootstrap(&state, "u1", munin_keys::Role::Operator, "u1-pass");
    state.keys.revoke_key("u1", "u1-key-1").unwrap();
    let app = build_router(state);

    let token = login(&app, "u1", "u1-pass").await;
    let (status, body) = send(
        &app,
        "POST",
        "/decisions",
        Some(&token),
        Some(json!({
            "incident_id": "incident-1",
            "playbook_id": "playbook-1",
            "action_type": "shutdown",
            "scope": {},
            "policy": { "threshold": 1, "required": 1, "signers": ["u1"] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let decision_id = body["decision"]["decision_id"].as_str().unwrap();

    let fake_signature = BASE64.encode(operator_key.sign(b"irrelevant").to_bytes());
    let (status, body) = send(
        &app,
        "POST",
        &format!("/decisions/{decision_id}/sign"),
        Some(&token),
        Some(json!({
            "signer_id": "u1",
            "signature": fake_signature,
            "key_id": "u1-key-1",
            "action_type": "shutdown",
            "scope": {}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "KeyNotActive");
}
