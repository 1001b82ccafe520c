//! Shared fixtures for integration tests: an in-memory app state, a router
//! factory, and request helpers that unwrap the JSON envelope.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use keymint::auth::TokenKeys;
use keymint::db::{self, AppState};
use keymint::payments::MockGateway;

pub const PREMIUM_PRICE_CENTS: i64 = 49900;

pub fn test_state() -> AppState {
    AppState {
        db: db::create_in_memory_pool().expect("in-memory pool"),
        tokens: TokenKeys::new("test-secret"),
        gateway: Arc::new(MockGateway::default()),
        audit_log_enabled: true,
        premium_price_cents: PREMIUM_PRICE_CENTS,
        currency: "INR".to_string(),
    }
}

pub fn router(state: &AppState) -> Router {
    keymint::handlers::router(state.clone()).with_state(state.clone())
}

pub fn future_timestamp(days: i64) -> i64 {
    chrono::Utc::now().timestamp() + days * 86400
}

/// Send a request and return (status, parsed JSON body).
pub async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register an owner account, returning (user_id, bearer token).
pub async fn register_owner(state: &AppState, email: &str) -> (String, String) {
    let (status, body) = send(
        state,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": email, "password": "correct-horse-battery" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "owner registration failed: {body}");
    (
        body["data"]["user"]["id"].as_str().unwrap().to_string(),
        body["data"]["token"].as_str().unwrap().to_string(),
    )
}

/// Create an app for an owner, returning the full app JSON.
pub async fn create_app(state: &AppState, token: &str, name: &str) -> Value {
    create_app_with_settings(state, token, name, json!({})).await
}

pub async fn create_app_with_settings(
    state: &AppState,
    token: &str,
    name: &str,
    settings: Value,
) -> Value {
    let (status, body) = send(
        state,
        "POST",
        "/apps",
        Some(token),
        Some(json!({ "name": name, "settings": settings })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "app creation failed: {body}");
    body["data"].clone()
}

/// Create a license via the owner API, returning the license JSON.
pub async fn create_license(state: &AppState, token: &str, app_id: &str) -> Value {
    let (status, body) = send(
        state,
        "POST",
        "/licenses",
        Some(token),
        Some(json!({ "app_id": app_id, "expires_at": future_timestamp(30) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "license creation failed: {body}");
    body["data"].clone()
}

/// Upgrade an owner to premium by walking the real order/verify flow against
/// the mock gateway.
pub async fn upgrade_to_premium(state: &AppState, token: &str) {
    let (status, body) = send(
        state,
        "POST",
        "/payments/razorpay/create-order",
        Some(token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "order creation failed: {body}");
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let payment_id = "pay_test_1";
    let signature = MockGateway::default().sign_checkout(&order_id, payment_id);
    let (status, body) = send(
        state,
        "POST",
        "/payments/razorpay/verify",
        Some(token),
        Some(json!({
            "order_id": order_id,
            "payment_id": payment_id,
            "signature": signature,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "payment verify failed: {body}");
}

/// Register a client against a license key via the public API.
pub async fn register_client(
    state: &AppState,
    app_id: &str,
    key: &str,
    username: &str,
) -> (StatusCode, Value) {
    send(
        state,
        "POST",
        "/clients/register",
        None,
        Some(json!({
            "app_id": app_id,
            "key": key,
            "username": username,
            "password": "client-password",
        })),
    )
    .await
}
