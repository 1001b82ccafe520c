use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{queries, AppState};
use crate::entitlements::Plan;
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, OwnerContext};
use crate::models::{
    ActorType, CreateOrderRequest, PaymentStatus, PaymentWithRefunds, RefundRequest,
    ValidateCouponRequest, VerifyPaymentRequest,
};
use crate::payments::WebhookVerification;
use crate::util::{audit_log, ok, ok_message};

const WEBHOOK_SIGNATURE_HEADER: &str = "x-razorpay-signature";
const WEBHOOK_EVENT_ID_HEADER: &str = "x-razorpay-event-id";

// ---- Public ----

pub async fn pricing(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "currency": state.currency,
            "plans": [
                {
                    "plan": "free",
                    "price_cents": 0,
                    "limits": Plan::Free.limits(),
                },
                {
                    "plan": "premium",
                    "price_cents": state.premium_price_cents,
                    "limits": Plan::Premium.limits(),
                },
            ],
        },
    }))
}

pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(input): Json<ValidateCouponRequest>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let coupon = queries::get_coupon_by_code(&conn, &input.code)?
        .filter(|c| c.is_redeemable(Utc::now().timestamp()))
        .ok_or_else(|| AppError::BadRequest("Invalid or expired coupon".into()))?;

    let discounted = coupon.apply(state.premium_price_cents);
    Ok(ok(json!({
        "coupon": coupon,
        "price_cents": discounted,
    })))
}

// ---- Owner-facing ----

pub async fn create_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Json(input): Json<CreateOrderRequest>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;

    let mut amount = state.premium_price_cents;
    let coupon_code = match &input.coupon {
        Some(code) => {
            let coupon = queries::get_coupon_by_code(&conn, code)?
                .filter(|c| c.is_redeemable(Utc::now().timestamp()))
                .ok_or_else(|| AppError::BadRequest("Invalid or expired coupon".into()))?;
            amount = coupon.apply(amount);
            Some(coupon.code)
        }
        None => None,
    };

    let order = state
        .gateway
        .create_order(amount, &state.currency, &ctx.user.id)
        .await?;

    let payment = queries::create_payment(
        &conn,
        &ctx.user.id,
        &order.order_id,
        order.amount_cents,
        &order.currency,
        Plan::Premium,
        coupon_code.as_deref(),
    )?;

    tracing::info!(
        "Order created: {} for user {} ({} {})",
        order.order_id,
        ctx.user.id,
        order.amount_cents,
        order.currency
    );

    Ok(ok(json!({
        "payment": payment,
        "order_id": order.order_id,
        "amount_cents": order.amount_cents,
        "currency": order.currency,
    })))
}

/// Synchronous capture path: the client returns from checkout with a
/// signature over "order_id|payment_id". A replay against an already
/// captured payment is a no-op success; the webhook races against this and
/// whichever claims the CAS first applies the upgrade.
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<VerifyPaymentRequest>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;

    let payment = queries::get_payment_by_order_id(&conn, &input.order_id)?
        .filter(|p| p.user_id == ctx.user.id)
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

    if !state
        .gateway
        .verify_checkout_signature(&input.order_id, &input.payment_id, &input.signature)
    {
        return Err(AppError::Unauthorized("Invalid payment signature".into()));
    }

    if payment.status == PaymentStatus::Captured {
        return Ok(ok_message("Payment already processed"));
    }

    if queries::try_capture_payment(&conn, &input.order_id, &input.payment_id)? {
        queries::set_user_plan(&conn, &ctx.user.id, payment.plan)?;

        audit_log(
            &conn,
            state.audit_log_enabled,
            ActorType::Owner,
            Some(&ctx.user.id),
            &headers,
            "payment_captured",
            "payment",
            &payment.id,
            Some(&json!({ "order_id": input.order_id, "plan": payment.plan })),
        )?;

        tracing::info!(
            "Payment captured via verify: {} -> plan {} for user {}",
            input.order_id,
            payment.plan.as_ref(),
            ctx.user.id
        );
    }

    Ok(ok_message("Payment verified; plan upgraded"))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let payments = queries::list_payments_for_user(&conn, &ctx.user.id)?;

    let mut with_refunds = Vec::with_capacity(payments.len());
    for payment in payments {
        let refunds = queries::list_refunds_for_payment(&conn, &payment.id)?;
        with_refunds.push(PaymentWithRefunds { payment, refunds });
    }

    Ok(ok(with_refunds))
}

pub async fn analytics(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    Ok(ok(queries::payment_analytics(&conn, &ctx.user.id)?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(payment_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let payment = queries::get_payment_by_id(&conn, &payment_id)?
        .filter(|p| p.user_id == ctx.user.id)
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;
    let refunds = queries::list_refunds_for_payment(&conn, &payment.id)?;
    Ok(ok(PaymentWithRefunds { payment, refunds }))
}

/// Issue a refund through the gateway and record it. A full refund also
/// downgrades the owner back to the free plan.
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(payment_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<RefundRequest>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let payment = queries::get_payment_by_id(&conn, &payment_id)?
        .filter(|p| p.user_id == ctx.user.id)
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

    if payment.status != PaymentStatus::Captured {
        return Err(AppError::Conflict(
            "Only captured payments can be refunded".into(),
        ));
    }
    let gateway_payment_id = payment
        .payment_id
        .clone()
        .ok_or_else(|| AppError::Conflict("Payment has no gateway payment id".into()))?;

    let already_refunded: i64 = queries::list_refunds_for_payment(&conn, &payment.id)?
        .iter()
        .map(|r| r.amount_cents)
        .sum();
    let refundable = payment.amount_cents - already_refunded;
    let amount = input.amount_cents.unwrap_or(refundable);
    if amount <= 0 || amount > refundable {
        return Err(AppError::BadRequest(format!(
            "Refund amount must be between 1 and {}",
            refundable
        )));
    }

    let gateway_refund = state
        .gateway
        .refund(&gateway_payment_id, Some(amount))
        .await?;

    let refund = queries::create_refund(&conn, &payment.id, &gateway_refund.refund_id, amount)?;

    let fully_refunded = already_refunded + amount >= payment.amount_cents;
    if fully_refunded {
        queries::mark_payment_refunded(&conn, &payment.id)?;
        queries::set_user_plan(&conn, &ctx.user.id, Plan::Free)?;
    }

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "refund_payment",
        "payment",
        &payment.id,
        Some(&json!({ "amount_cents": amount, "full": fully_refunded })),
    )?;

    tracing::info!(
        "Refund issued: {} on payment {} ({} cents, full: {})",
        refund.refund_id,
        payment.id,
        amount,
        fully_refunded
    );

    Ok(ok(refund))
}

/// Explicit downgrade request.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    queries::set_user_plan(&conn, &ctx.user.id, Plan::Free)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "cancel_subscription",
        "user",
        &ctx.user.id,
        None,
    )?;

    tracing::info!("Subscription cancelled for user {}", ctx.user.id);

    Ok(ok_message("Subscription cancelled; plan downgraded to free"))
}

// ---- Webhook ----

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<WebhookPaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentWrapper {
    entity: WebhookPaymentEntity,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentEntity {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
}

/// Asynchronous capture path. Must stay idempotent against replays: event
/// dedup first, then the same capture CAS the verify call uses. A missing
/// webhook secret is acknowledged with 200 (so the gateway stops retrying)
/// but logged loudly; a bad signature is rejected.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s.to_string(),
        None => return (StatusCode::BAD_REQUEST, "Missing signature header"),
    };

    match state.gateway.verify_webhook_signature(&body, &signature) {
        WebhookVerification::Valid => {}
        WebhookVerification::Invalid => {
            tracing::warn!("Webhook rejected: signature mismatch");
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        WebhookVerification::NotConfigured => {
            tracing::error!("Webhook received but no webhook secret is configured");
            return (StatusCode::OK, "Webhook not configured");
        }
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse webhook body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Replay protection: every delivery carries an event id; fall back to a
    // body digest when the header is absent.
    let event_id = headers
        .get(WEBHOOK_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| crate::crypto::hash_secret(&String::from_utf8_lossy(&body)));

    let provider = state.gateway.provider().as_str();
    match queries::try_record_webhook_event(&conn, provider, &event_id) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::OK, "Already processed"),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    if event.event != "payment.captured" {
        return (StatusCode::OK, "Event ignored");
    }

    let entity = match event.payload.and_then(|p| p.payment).map(|p| p.entity) {
        Some(e) => e,
        None => return (StatusCode::OK, "No payment payload"),
    };
    let order_id = match &entity.order_id {
        Some(id) => id,
        None => return (StatusCode::OK, "No order id"),
    };

    let payment = match queries::get_payment_by_order_id(&conn, order_id) {
        Ok(Some(p)) => p,
        Ok(None) => {
            tracing::warn!("Webhook for unknown order: {}", order_id);
            return (StatusCode::OK, "Order not found");
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Same CAS as the verify path; a payment already captured is a no-op.
    match queries::try_capture_payment(&conn, order_id, &entity.id) {
        Ok(true) => {
            if let Err(e) = queries::set_user_plan(&conn, &payment.user_id, payment.plan) {
                tracing::error!("Failed to upgrade plan after webhook capture: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to apply plan");
            }
            tracing::info!(
                "Payment captured via webhook: {} -> plan {} for user {}",
                order_id,
                payment.plan.as_ref(),
                payment.user_id
            );
        }
        Ok(false) => return (StatusCode::OK, "Already captured"),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    (StatusCode::OK, "OK")
}

pub fn router(state: AppState) -> Router<AppState> {
    let owner_routes = Router::new()
        .route("/payments/razorpay/create-order", post(create_order))
        .route("/payments/razorpay/verify", post(verify_payment))
        .route("/payments/history", get(history))
        .route("/payments/analytics", get(analytics))
        .route("/payments/cancel-subscription", post(cancel_subscription))
        .route("/payments/{payment_id}", get(get_payment))
        .route("/payments/{payment_id}/refund", post(refund_payment))
        .layer(middleware::from_fn_with_state(state, owner_auth));

    Router::new()
        .route("/payments/pricing", get(pricing))
        .route("/payments/validate-coupon", post(validate_coupon))
        .route("/payments/webhook", post(webhook))
        .merge(owner_routes)
}
