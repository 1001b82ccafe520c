//! Payment bridge tests: pricing, the order/verify upgrade path, webhook
//! signature and replay handling, refunds, coupons, and downgrade.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use keymint::payments::MockGateway;

mod common;
use common::*;

async fn owner_plan(state: &keymint::db::AppState, token: &str) -> String {
    let (_, body) = send(state, "GET", "/auth/profile", Some(token), None).await;
    body["data"]["plan"].as_str().unwrap().to_string()
}

/// Deliver a webhook with the given body, signature, and event id.
async fn deliver_webhook(
    state: &keymint::db::AppState,
    body: &Value,
    signature: &str,
    event_id: &str,
) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .header("Content-Type", "application/json")
        .header("x-razorpay-signature", signature)
        .header("x-razorpay-event-id", event_id)
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn captured_event(order_id: &str, payment_id: &str) -> Value {
    json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": { "id": payment_id, "order_id": order_id, "status": "captured" }
            }
        }
    })
}

#[tokio::test]
async fn pricing_is_public_and_reflects_plan_limits() {
    let state = test_state();
    let (status, body) = send(&state, "GET", "/payments/pricing", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let plans = body["data"]["plans"].as_array().unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0]["price_cents"], 0);
    assert_eq!(plans[1]["price_cents"], PREMIUM_PRICE_CENTS);
    assert_eq!(plans[1]["limits"]["max_apps"], -1);
}

#[tokio::test]
async fn verify_with_bad_signature_does_not_upgrade() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;

    let (_, body) = send(
        &state,
        "POST",
        "/payments/razorpay/create-order",
        Some(&token),
        Some(json!({})),
    )
    .await;
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "POST",
        "/payments/razorpay/verify",
        Some(&token),
        Some(json!({
            "order_id": order_id,
            "payment_id": "pay_1",
            "signature": "forged",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(owner_plan(&state, &token).await, "free");
}

#[tokio::test]
async fn verify_upgrades_and_is_idempotent() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;

    upgrade_to_premium(&state, &token).await;
    assert_eq!(owner_plan(&state, &token).await, "premium");

    // History shows the captured payment.
    let (_, body) = send(&state, "GET", "/payments/history", Some(&token), None).await;
    let payments = body["data"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["status"], "captured");
    assert_eq!(payments[0]["amount_cents"], PREMIUM_PRICE_CENTS);

    // Replaying the same verify is a no-op success.
    let order_id = payments[0]["order_id"].as_str().unwrap().to_string();
    let signature = MockGateway::default().sign_checkout(&order_id, "pay_test_1");
    let (status, body) = send(
        &state,
        "POST",
        "/payments/razorpay/verify",
        Some(&token),
        Some(json!({
            "order_id": order_id,
            "payment_id": "pay_test_1",
            "signature": signature,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment already processed");
}

#[tokio::test]
async fn webhook_captures_and_replays_are_ignored() {
    let state = test_state();
    let (user_id, token) = register_owner(&state, "owner@example.com").await;

    let (_, body) = send(
        &state,
        "POST",
        "/payments/razorpay/create-order",
        Some(&token),
        Some(json!({})),
    )
    .await;
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let event = captured_event(&order_id, "pay_hook_1");
    let signature = MockGateway::default().sign_webhook(event.to_string().as_bytes());

    let (status, reply) = deliver_webhook(&state, &event, &signature, "evt_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "OK");
    assert_eq!(owner_plan(&state, &token).await, "premium");

    // Same event id again: deduplicated.
    let (status, reply) = deliver_webhook(&state, &event, &signature, "evt_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Already processed");

    // New delivery for the same order: capture CAS makes it a no-op.
    let (status, reply) = deliver_webhook(&state, &event, &signature, "evt_2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Already captured");

    // The payment history still shows exactly one capture for the user.
    let conn = state.db.get().unwrap();
    let payments = keymint::db::queries::list_payments_for_user(&conn, &user_id).unwrap();
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let state = test_state();
    let event = captured_event("order_x", "pay_x");

    let (status, _) = deliver_webhook(&state, &event, "bogus-signature", "evt_1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_ignores_unrelated_events() {
    let state = test_state();
    let event = json!({ "event": "payment.failed", "payload": {} });
    let signature = MockGateway::default().sign_webhook(event.to_string().as_bytes());

    let (status, reply) = deliver_webhook(&state, &event, &signature, "evt_1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply, "Event ignored");
}

#[tokio::test]
async fn full_refund_downgrades_the_owner() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    upgrade_to_premium(&state, &token).await;

    let (_, body) = send(&state, "GET", "/payments/history", Some(&token), None).await;
    let payment_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &state,
        "POST",
        &format!("/payments/{}/refund", payment_id),
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount_cents"], PREMIUM_PRICE_CENTS);

    assert_eq!(owner_plan(&state, &token).await, "free");

    let (_, body) = send(
        &state,
        "GET",
        &format!("/payments/{}", payment_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["data"]["status"], "refunded");
    assert_eq!(body["data"]["refunds"].as_array().unwrap().len(), 1);

    // A second refund attempt is rejected.
    let (status, _) = send(
        &state,
        "POST",
        &format!("/payments/{}/refund", payment_id),
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn partial_refund_keeps_the_plan() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    upgrade_to_premium(&state, &token).await;

    let (_, body) = send(&state, "GET", "/payments/history", Some(&token), None).await;
    let payment_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &state,
        "POST",
        &format!("/payments/{}/refund", payment_id),
        Some(&token),
        Some(json!({ "amount_cents": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(owner_plan(&state, &token).await, "premium");
}

#[tokio::test]
async fn cancel_subscription_downgrades_immediately() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;
    upgrade_to_premium(&state, &token).await;

    let (status, _) = send(
        &state,
        "POST",
        "/payments/cancel-subscription",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(owner_plan(&state, &token).await, "free");
}

#[tokio::test]
async fn coupons_discount_orders() {
    let state = test_state();
    let (_, token) = register_owner(&state, "owner@example.com").await;

    {
        let conn = state.db.get().unwrap();
        keymint::db::queries::create_coupon(&conn, "LAUNCH25", 25, None).unwrap();
    }

    let (status, body) = send(
        &state,
        "POST",
        "/payments/validate-coupon",
        None,
        Some(json!({ "code": "LAUNCH25" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["price_cents"], PREMIUM_PRICE_CENTS * 3 / 4);

    let (status, body) = send(
        &state,
        "POST",
        "/payments/razorpay/create-order",
        Some(&token),
        Some(json!({ "coupon": "LAUNCH25" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount_cents"], PREMIUM_PRICE_CENTS * 3 / 4);

    let (status, _) = send(
        &state,
        "POST",
        "/payments/validate-coupon",
        None,
        Some(json!({ "code": "NOPE" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_history_is_owner_scoped() {
    let state = test_state();
    let (_, token_a) = register_owner(&state, "a@example.com").await;
    let (_, token_b) = register_owner(&state, "b@example.com").await;
    upgrade_to_premium(&state, &token_a).await;

    let (_, body) = send(&state, "GET", "/payments/history", Some(&token_a), None).await;
    let payment_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (_, body) = send(&state, "GET", "/payments/history", Some(&token_b), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &state,
        "GET",
        &format!("/payments/{}", payment_id),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
