mod mock;
mod razorpay;

pub use mock::*;
pub use razorpay::*;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Razorpay,
    Mock,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Razorpay => "razorpay",
            PaymentProvider::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub payment_id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub amount_cents: i64,
}

/// Outcome of a webhook signature check. `NotConfigured` is distinct so the
/// handler can acknowledge delivery (avoiding retry storms) while logging
/// the misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookVerification {
    Valid,
    Invalid,
    NotConfigured,
}

/// Payment-gateway boundary. Selected once at startup and injected into the
/// payment handlers; business logic never branches on dev mode.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_order(
        &self,
        amount_cents: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment>;

    /// Checkout callback signature: HMAC-SHA256 over "order_id|payment_id".
    fn verify_checkout_signature(&self, order_id: &str, payment_id: &str, signature: &str)
        -> bool;

    /// Webhook signature: HMAC-SHA256 over the raw request body.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> WebhookVerification;

    async fn refund(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<GatewayRefund>;
}

pub(crate) fn hmac_hex(secret: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of hex-encoded signatures.
pub(crate) fn signatures_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let sig = hmac_hex("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn signature_comparison() {
        assert!(signatures_match("abcd", "abcd"));
        assert!(!signatures_match("abcd", "abce"));
        assert!(!signatures_match("abcd", "abcde"));
    }
}
