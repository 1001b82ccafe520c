use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::entitlements::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Captured,
    Failed,
    Refunded,
}

/// Append-only record of a gateway transaction. Observational: it records
/// what the payment bridge did; the route handlers drive the plan mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: String,
    #[serde(skip_serializing)]
    pub payment_ref: String,
    pub refund_id: String,
    pub amount_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub struct PaymentWithRefunds {
    #[serde(flatten)]
    pub payment: Payment,
    pub refunds: Vec<Refund>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub percent_off: i64,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Coupon {
    pub fn is_redeemable(&self, now: i64) -> bool {
        self.active && self.expires_at.is_none_or(|exp| now <= exp)
    }

    pub fn apply(&self, amount_cents: i64) -> i64 {
        let discount = amount_cents * self.percent_off / 100;
        (amount_cents - discount).max(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub coupon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// None = full refund of the captured amount.
    #[serde(default)]
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentAnalytics {
    pub total_payments: i64,
    pub captured_payments: i64,
    pub refunded_payments: i64,
    pub gross_cents: i64,
    pub refunded_cents: i64,
}
