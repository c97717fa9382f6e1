//! API Integration Tests
//!
//! These drive the router against in-memory stores. PostgreSQL-backed store
//! tests live next to the repository and are `#[ignore]`d.
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use encore_api::{create_router, state::AppState};
use encore_core::{AppConfig, Argon2Config};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn test_state() -> Arc<AppState> {
    let mut config = AppConfig::default();
    config.auth.access_secret = "api-test-access-secret".to_string();
    config.auth.refresh_secret = "api-test-refresh-secret".to_string();
    config.auth.argon2 = Argon2Config {
        memory_kib: 64,
        time_cost: 1,
        parallelism: 1,
        output_len: 32,
    };
    Arc::new(AppState::in_memory(config).unwrap())
}

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn bearer_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register(app: &Router, email: &str, password: &str) -> Value {
    let (status, body) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({
                "email": email,
                "password": password,
                "display_name": "Test User"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn refresh(app: &Router, refresh_token: &Value) -> (StatusCode, Value) {
    send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router(test_state());

    let (status, json) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_check() {
    let app = create_router(test_state());

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/health/ready")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"]["persistent_storage"], false);
    assert_eq!(json["checks"]["google_sign_in"], false);
}

#[tokio::test]
async fn test_readiness_fails_when_draining() {
    let state = test_state();
    let app = create_router(state.clone());
    state.set_ready(false);

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/health/ready")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router(test_state());

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/api/v1/auth/login"].is_object());
}

// =============================================================================
// Registration and Login Tests
// =============================================================================

#[tokio::test]
async fn test_register_returns_token_pair() {
    let app = create_router(test_state());
    let body = register(&app, "alice@example.com", "correcthorse123").await;

    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_register_duplicate_email() {
    let app = create_router(test_state());
    register(&app, "alice@example.com", "correcthorse123").await;

    let (status, body) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({
                "email": "ALICE@example.com",
                "password": "anotherpass123",
                "display_name": "Other"
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "USER_EXISTS");
}

#[tokio::test]
async fn test_register_validation() {
    let app = create_router(test_state());

    let (status, body) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({
                "email": "not-an-email",
                "password": "short",
                "display_name": "X"
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = create_router(test_state());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = create_router(test_state());
    register(&app, "alice@example.com", "correcthorse123").await;

    let wrong_password = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "alice@example.com", "password": "nope-nope" })),
        ),
    )
    .await;
    let unknown_email = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "ghost@example.com", "password": "correcthorse123" })),
        ),
    )
    .await;

    assert_eq!(wrong_password.0, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password, unknown_email);
    assert_eq!(wrong_password.1["code"], "AUTHENTICATION_FAILED");
    assert_eq!(wrong_password.1["message"], "Authentication failed");
}

#[tokio::test]
async fn test_login_success() {
    let app = create_router(test_state());
    register(&app, "alice@example.com", "correcthorse123").await;

    let (status, body) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": " Alice@Example.com ", "password": "correcthorse123" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn test_google_login_not_configured() {
    let app = create_router(test_state());

    let (status, body) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/google",
            Some(json!({ "id_token": "a.b.c" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_session_lifecycle() {
    let app = create_router(test_state());
    let t0 = register(&app, "alice@example.com", "correcthorse123").await;

    // Rotate
    let (status, t1) = refresh(&app, &t0["refresh_token"]).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(t0["refresh_token"], t1["refresh_token"]);

    // The rotated token is dead
    let (status, body) = refresh(&app, &t0["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");

    // Logout the live one
    let (status, body) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/logout",
            Some(json!({ "refresh_token": t1["refresh_token"] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    let (status, _) = refresh(&app, &t1["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Access tokens stay valid until their own expiry
    let access = t1["access_token"].as_str().unwrap();
    let (status, me) = send(&app, bearer_request("GET", "/api/v1/auth/me", access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");
}

#[tokio::test]
async fn test_logout_with_unusable_token_succeeds() {
    let app = create_router(test_state());

    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/logout",
            Some(json!({ "refresh_token": "garbage" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_me_requires_access_token() {
    let app = create_router(test_state());
    let pair = register(&app, "alice@example.com", "correcthorse123").await;

    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/v1/auth/me")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let refresh_token = pair["refresh_token"].as_str().unwrap();
    let (status, body) = send(
        &app,
        bearer_request("GET", "/api/v1/auth/me", refresh_token),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");
}

#[tokio::test]
async fn test_revoke_all_own_sessions() {
    let app = create_router(test_state());
    let first = register(&app, "alice@example.com", "correcthorse123").await;
    let (_, second) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "email": "alice@example.com", "password": "correcthorse123" })),
        ),
    )
    .await;

    let access = second["access_token"].as_str().unwrap();
    let (status, body) = send(
        &app,
        bearer_request("POST", "/api/v1/auth/revoke-all", access),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 2);

    for pair in [&first, &second] {
        let (status, _) = refresh(&app, &pair["refresh_token"]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

// =============================================================================
// Admin Tests
// =============================================================================

#[tokio::test]
async fn test_admin_revoke_all() {
    let state = test_state();
    let app = create_router(state.clone());
    let victim = register(&app, "bob@example.com", "hunter2hunter2").await;
    let victim_id = victim["user"]["id"].as_str().unwrap();
    let uri = format!("/api/v1/admin/users/{victim_id}/revoke-all");

    // Regular users are refused
    let user_access = victim["access_token"].as_str().unwrap();
    let (status, body) = send(&app, bearer_request("POST", &uri, user_access)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let admin = state
        .sessions
        .codec()
        .issue_pair(
            Uuid::new_v4(),
            "root@example.com",
            &["user".to_string(), "admin".to_string()],
        )
        .unwrap();

    let (status, body) = send(&app, bearer_request("POST", &uri, &admin.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 1);

    let (status, _) = refresh(&app, &victim["refresh_token"]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        bearer_request(
            "POST",
            "/api/v1/admin/users/not-a-uuid/revoke-all",
            &admin.access_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
