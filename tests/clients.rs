//! Client session tests: registration guard order, login checks, HWID
//! binding, session validation, and owner-side client administration.

use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;
use common::*;

async fn login_client(
    state: &keymint::db::AppState,
    app: &Value,
    username: &str,
    hwid: Option<&str>,
) -> (StatusCode, Value) {
    let mut body = json!({
        "app_id": app["app_id"],
        "app_secret": app["app_secret"],
        "username": username,
        "password": "client-password",
    });
    if let Some(hwid) = hwid {
        body["hwid"] = json!(hwid);
    }
    send(state, "POST", "/clients/login", None, Some(body)).await
}

#[tokio::test]
async fn registration_consumes_the_license() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let key = license["key"].as_str().unwrap();

    let (status, body) = register_client(&state, app_id, key, "player1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "player1");
    assert_eq!(body["data"]["license_key"], *key);
    // Expiry is copied from the license.
    assert_eq!(body["data"]["expires_at"], license["expires_at"]);

    // The license is now consumed and bound to the client.
    let (_, body2) = send(
        &state,
        "GET",
        &format!("/licenses/{}", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body2["data"]["used"], true);
    assert_eq!(body2["data"]["used_by"], body["data"]["id"]);

    // A second registration against the same key fails with the used message.
    let (status, body) = register_client(&state, app_id, key, "player2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This license key has already been used");
}

#[tokio::test]
async fn registration_guard_order_and_messages() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap().to_string();

    // Unknown key.
    let (status, body) = register_client(&state, &app_id, "nope", "player1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invalid license key");

    let license = create_license(&state, &token, &app_id).await;
    let key = license["key"].as_str().unwrap().to_string();

    // Paused app wins over everything after key lookup.
    let (status, _) = send(
        &state,
        "PUT",
        &format!("/apps/{}", app_id),
        Some(&token),
        Some(json!({ "paused": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = register_client(&state, &app_id, &key, "player1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This application is currently paused");

    let (status, _) = send(
        &state,
        "PUT",
        &format!("/apps/{}", app_id),
        Some(&token),
        Some(json!({ "paused": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Banned license.
    let (status, _) = send(
        &state,
        "PATCH",
        &format!("/licenses/{}/toggle-ban", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = register_client(&state, &app_id, &key, "player1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This license key is banned");

    // Failed attempts never consumed the license.
    let (_, body) = send(
        &state,
        "GET",
        &format!("/licenses/{}", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["used"], false);
    assert_eq!(body["data"]["status"], "banned");

    // Unban, then a short username is rejected with the configured message.
    let (status, _) = send(
        &state,
        "PATCH",
        &format!("/licenses/{}/toggle-ban", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = register_client(&state, &app_id, &key, "ab").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Username must be at least 3 characters");
}

#[tokio::test]
async fn expired_license_cannot_be_consumed() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let key = license["key"].as_str().unwrap();

    // Force the expiry into the past directly.
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "UPDATE licenses SET expires_at = 1000 WHERE id = ?1",
            [license["id"].as_str().unwrap()],
        )
        .unwrap();
    }

    let (status, body) = register_client(&state, app_id, key, "player1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This license key has expired");

    // Still unconsumed and still active in stored status.
    let (_, body) = send(
        &state,
        "GET",
        &format!("/licenses/{}", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["used"], false);
    assert_eq!(body["data"]["status"], "active");
}

#[tokio::test]
async fn username_is_unique_per_app_not_globally() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app_a = create_app(&state, &token, "A").await;
    let app_b = create_app(&state, &token, "B").await;

    let license_a = create_license(&state, &token, app_a["app_id"].as_str().unwrap()).await;
    let license_b1 = create_license(&state, &token, app_b["app_id"].as_str().unwrap()).await;
    let license_b2 = create_license(&state, &token, app_b["app_id"].as_str().unwrap()).await;

    let (status, _) = register_client(
        &state,
        app_a["app_id"].as_str().unwrap(),
        license_a["key"].as_str().unwrap(),
        "player1",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same username in another app is fine.
    let (status, _) = register_client(
        &state,
        app_b["app_id"].as_str().unwrap(),
        license_b1["key"].as_str().unwrap(),
        "player1",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Duplicate within the same app is not.
    let (status, body) = register_client(
        &state,
        app_b["app_id"].as_str().unwrap(),
        license_b2["key"].as_str().unwrap(),
        "player1",
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "This username is already taken");
}

#[tokio::test]
async fn login_requires_both_app_credentials() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let (status, _) =
        register_client(&state, app_id, license["key"].as_str().unwrap(), "player1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        "POST",
        "/clients/login",
        None,
        Some(json!({
            "app_id": app_id,
            "app_secret": "wrong-secret",
            "username": "player1",
            "password": "client-password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = login_client(&state, &app, "player1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["login_count"], 1);
    assert!(body["data"]["last_login"].is_i64());
}

#[tokio::test]
async fn login_rejects_banned_and_expired_clients() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let (_, body) =
        register_client(&state, app_id, license["key"].as_str().unwrap(), "player1").await;
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    // Ban via the owner API.
    let (status, _) = send(
        &state,
        "PATCH",
        &format!("/clients/{}/toggle-ban", client_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = login_client(&state, &app, "player1", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This account is banned");

    // Unban, then expire.
    send(
        &state,
        "PATCH",
        &format!("/clients/{}/toggle-ban", client_id),
        Some(&token),
        None,
    )
    .await;
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "UPDATE clients SET expires_at = 1000 WHERE id = ?1",
            [client_id.as_str()],
        )
        .unwrap();
    }

    let (status, body) = login_client(&state, &app, "player1", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This account has expired");
}

#[tokio::test]
async fn hwid_lock_rejects_mismatch_without_counting_the_login() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app_with_settings(&state, &token, "App", json!({ "hwid_lock": true })).await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    register_client(&state, app_id, license["key"].as_str().unwrap(), "player1").await;

    // First login binds the hardware id.
    let (status, body) = login_client(&state, &app, "player1", Some("HWID-AAA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hwid"], "HWID-AAA");
    assert_eq!(body["data"]["login_count"], 1);

    // A different machine is rejected with the configured message.
    let (status, body) = login_client(&state, &app, "player1", Some("HWID-BBB")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Hardware ID mismatch");

    // The failed attempt did not count.
    let (status, body) = login_client(&state, &app, "player1", Some("HWID-AAA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["login_count"], 2);
}

#[tokio::test]
async fn without_hwid_lock_the_latest_hwid_is_adopted() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    register_client(&state, app_id, license["key"].as_str().unwrap(), "player1").await;

    let (status, body) = login_client(&state, &app, "player1", Some("HWID-AAA")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hwid"], "HWID-AAA");

    // A new machine silently replaces the stored id.
    let (status, body) = login_client(&state, &app, "player1", Some("HWID-BBB")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hwid"], "HWID-BBB");
}

#[tokio::test]
async fn validate_session_is_read_only() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let (_, body) =
        register_client(&state, app_id, license["key"].as_str().unwrap(), "player1").await;
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    let validate = |username: &str| {
        let body = json!({
            "app_id": app["app_id"],
            "app_secret": app["app_secret"],
            "username": username,
        });
        send(&state, "POST", "/clients/validate-session", None, Some(body))
    };

    let (status, body) = validate("player1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);

    let (status, body) = validate("ghost").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["reason"], "User not found");

    // Ban the client; validation flips but the login counter is untouched.
    send(
        &state,
        "PATCH",
        &format!("/clients/{}/toggle-ban", client_id),
        Some(&token),
        None,
    )
    .await;

    let (status, body) = validate("player1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["reason"], "This account is banned");

    let (_, body) = send(
        &state,
        "GET",
        &format!("/clients?app_id={}", app_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"][0]["login_count"], 0);
}

#[tokio::test]
async fn direct_clients_and_admin_operations() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();

    let expires = future_timestamp(7);
    let (status, body) = send(
        &state,
        "POST",
        "/clients/create-direct",
        Some(&token),
        Some(json!({
            "app_id": app_id,
            "username": "vip",
            "password": "client-password",
            "expires_at": expires,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let client_id = body["data"]["id"].as_str().unwrap().to_string();
    assert!(body["data"].get("license_key").is_none());

    // Extend stacks on the current expiry.
    let (status, body) = send(
        &state,
        "PATCH",
        &format!("/clients/{}/extend", client_id),
        Some(&token),
        Some(json!({ "days": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["expires_at"].as_i64().unwrap(), expires + 3 * 86400);

    // Reset HWID.
    let (status, _) = send(
        &state,
        "PATCH",
        &format!("/clients/{}/reset-hwid", client_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_a_client_frees_its_license() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    let app = create_app(&state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap();
    let license = create_license(&state, &token, app_id).await;
    let key = license["key"].as_str().unwrap();

    let (_, body) = register_client(&state, app_id, key, "player1").await;
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "DELETE",
        &format!("/clients/{}", client_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // License is unconsumed again and can be redeemed by someone else.
    let (_, body) = send(
        &state,
        "GET",
        &format!("/licenses/{}", license["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["used"], false);

    let (status, _) = register_client(&state, app_id, key, "player2").await;
    assert_eq!(status, StatusCode::OK);
}
