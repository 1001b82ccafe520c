//! Reseller delegation tests: plan gating, quota enforcement and raising,
//! permission flags, the forced-off delete flag, and deletion blocking.

use axum::http::StatusCode;
use serde_json::{json, Value};

mod common;
use common::*;

/// Premium owner + app + reseller with the given limit and actions.
/// Returns (owner_token, app JSON, reseller id, reseller token).
async fn setup_reseller(
    state: &keymint::db::AppState,
    license_limit: i64,
    allowed_actions: Value,
) -> (String, Value, String, String) {
    let (_, token) = register_owner(state, "owner@example.com").await;
    upgrade_to_premium(state, &token).await;
    let app = create_app(state, &token, "App").await;
    let app_id = app["app_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        state,
        "POST",
        "/resellers",
        Some(&token),
        Some(json!({
            "app_id": app_id,
            "username": "shopfront",
            "password": "reseller-password",
            "license_limit": license_limit,
            "allowed_actions": allowed_actions,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "reseller creation failed: {body}");
    let reseller_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        state,
        "POST",
        "/resellers/auth/login",
        None,
        Some(json!({
            "app_id": app_id,
            "username": "shopfront",
            "password": "reseller-password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "reseller login failed: {body}");
    let reseller_token = body["data"]["token"].as_str().unwrap().to_string();

    (token, app, reseller_id, reseller_token)
}

#[tokio::test]
async fn free_plan_owner_cannot_create_resellers() {
    let state = test_state();
    let (_, token) = register_owner(&state, "free@example.com").await;
    let app = create_app(&state, &token, "App").await;

    let (status, _) = send(
        &state,
        "POST",
        "/resellers",
        Some(&token),
        Some(json!({
            "app_id": app["app_id"],
            "username": "shopfront",
            "password": "reseller-password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reseller_quota_blocks_then_raising_it_unblocks() {
    let state = test_state();
    let (token, _, reseller_id, reseller_token) =
        setup_reseller(&state, 5, json!({ "create": true })).await;

    let (status, _) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Quota exhausted: one more is rejected with the limit message.
    let (status, body) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Reseller license limit reached");

    // Owner raises the limit to 6; the next creation succeeds and the
    // counter lands on 6.
    let (status, _) = send(
        &state,
        "PUT",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        Some(json!({ "license_limit": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &state,
        "GET",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["used_licenses"], 6);
}

#[tokio::test]
async fn reseller_without_create_flag_is_rejected() {
    let state = test_state();
    let (_, _, _, reseller_token) =
        setup_reseller(&state, -1, json!({ "create": false })).await;

    let (status, body) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "Reseller is not permitted to perform this action"
    );
}

#[tokio::test]
async fn delete_flag_is_forced_off() {
    let state = test_state();
    let (token, _, reseller_id, _) = setup_reseller(
        &state,
        -1,
        json!({ "create": true, "ban_unban": true, "edit_expiry": true, "delete": true }),
    )
    .await;

    let (_, body) = send(
        &state,
        "GET",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["allowed_actions"]["delete"], false);
    assert_eq!(body["data"]["allowed_actions"]["create"], true);
    assert_eq!(body["data"]["allowed_actions"]["ban_unban"], true);
}

#[tokio::test]
async fn deactivated_reseller_loses_console_access() {
    let state = test_state();
    let (token, _, reseller_id, reseller_token) =
        setup_reseller(&state, -1, json!({ "create": true })).await;

    let (status, _) = send(
        &state,
        "PUT",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        Some(json!({ "active": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        "GET",
        "/resellers/auth/profile",
        Some(&reseller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reseller_deletion_blocked_only_by_active_licenses() {
    let state = test_state();
    let (token, _, reseller_id, reseller_token) =
        setup_reseller(&state, -1, json!({ "create": true })).await;

    let (_, body) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 2 })),
    )
    .await;
    let license_ids: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["id"].as_str().unwrap().to_string())
        .collect();

    // ACTIVE licenses block deletion.
    let (status, body) = send(
        &state,
        "DELETE",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("active"));

    // Revoke one, ban the other: neither is ACTIVE anymore, so deletion
    // goes through despite the history.
    {
        let conn = state.db.get().unwrap();
        keymint::db::queries::revoke_license(&conn, &license_ids[0]).unwrap();
    }
    let (status, _) = send(
        &state,
        "PATCH",
        &format!("/licenses/{}/toggle-ban", license_ids[1]),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &state,
        "DELETE",
        &format!("/resellers/{}", reseller_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reseller_ban_and_extend_are_flag_gated() {
    let state = test_state();
    let (token, app, _, reseller_token) = setup_reseller(
        &state,
        -1,
        json!({ "create": true, "ban_unban": true, "edit_expiry": false }),
    )
    .await;

    // A license created by the owner is still within the reseller's app.
    let license = create_license(&state, &token, app["app_id"].as_str().unwrap()).await;
    let id = license["id"].as_str().unwrap().to_string();
    let expires = license["expires_at"].as_i64().unwrap();

    let (status, body) = send(
        &state,
        "PATCH",
        &format!("/resellers/auth/licenses/{}/toggle-ban", id),
        Some(&reseller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "banned");

    // edit_expiry was not granted.
    let (status, body) = send(
        &state,
        "PATCH",
        &format!("/resellers/auth/licenses/{}/extend", id),
        Some(&reseller_token),
        Some(json!({ "extend_days": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        "Reseller is not permitted to perform this action"
    );

    // Expiry is unchanged.
    let (_, body) = send(&state, "GET", &format!("/licenses/{}", id), Some(&token), None).await;
    assert_eq!(body["data"]["expires_at"].as_i64().unwrap(), expires);
}

#[tokio::test]
async fn reseller_cannot_touch_foreign_apps_licenses() {
    let state = test_state();
    let (token, _, _, reseller_token) = setup_reseller(
        &state,
        -1,
        json!({ "create": true, "ban_unban": true }),
    )
    .await;

    // Same owner, different app: out of the reseller's scope.
    let other_app = create_app(&state, &token, "Other").await;
    let license = create_license(&state, &token, other_app["app_id"].as_str().unwrap()).await;

    let (status, _) = send(
        &state,
        "PATCH",
        &format!(
            "/resellers/auth/licenses/{}/toggle-ban",
            license["id"].as_str().unwrap()
        ),
        Some(&reseller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reseller_dashboard_reports_quota_and_counts() {
    let state = test_state();
    let (_, app, _, reseller_token) = setup_reseller(&state, 10, json!({ "create": true })).await;

    let (_, body) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 3 })),
    )
    .await;
    let key = body["data"][0]["key"].as_str().unwrap().to_string();

    // One of them gets consumed.
    let (status, _) =
        register_client(&state, app["app_id"].as_str().unwrap(), &key, "player1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &state,
        "GET",
        "/resellers/dashboard/data",
        Some(&reseller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["license_limit"], 10);
    assert_eq!(body["data"]["used_licenses"], 3);
    assert_eq!(body["data"]["remaining"], 7);
    assert_eq!(body["data"]["licenses_active"], 3);
    assert_eq!(body["data"]["licenses_consumed"], 1);
}

#[tokio::test]
async fn reseller_sees_only_their_own_licenses() {
    let state = test_state();
    let (token, app, _, reseller_token) =
        setup_reseller(&state, -1, json!({ "create": true })).await;

    // Owner-created license in the same app.
    create_license(&state, &token, app["app_id"].as_str().unwrap()).await;

    let (_, body) = send(
        &state,
        "POST",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        Some(json!({ "expires_at": future_timestamp(30), "count": 2 })),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &state,
        "GET",
        "/resellers/auth/licenses",
        Some(&reseller_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let licenses = body["data"].as_array().unwrap();
    assert_eq!(licenses.len(), 2);
    assert!(licenses.iter().all(|l| l["created_by_type"] == "reseller"));
}

#[tokio::test]
async fn owner_token_is_not_a_reseller_token() {
    let state = test_state();
    let (token, ..) = setup_reseller(&state, -1, json!({ "create": true })).await;

    let (status, _) = send(&state, "GET", "/resellers/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
