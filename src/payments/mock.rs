use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::{
    hmac_hex, signatures_match, GatewayOrder, GatewayPayment, GatewayRefund, PaymentGateway,
    PaymentProvider, WebhookVerification,
};

/// In-process gateway for dev mode and tests. Uses the same HMAC signature
/// scheme as the real client so callers can exercise the full verify path.
#[derive(Clone)]
pub struct MockGateway {
    secret: String,
}

impl MockGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Produce a valid checkout signature, for simulating a completed payment.
    pub fn sign_checkout(&self, order_id: &str, payment_id: &str) -> String {
        hmac_hex(&self.secret, format!("{}|{}", order_id, payment_id).as_bytes())
    }

    /// Produce a valid webhook signature over a raw body.
    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        hmac_hex(&self.secret, payload)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new("mock-gateway-secret")
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mock
    }

    async fn create_order(
        &self,
        amount_cents: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayOrder> {
        Ok(GatewayOrder {
            order_id: format!("order_mock_{}", Uuid::new_v4().simple()),
            amount_cents,
            currency: currency.to_string(),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment> {
        Ok(GatewayPayment {
            payment_id: payment_id.to_string(),
            order_id: None,
            status: "captured".to_string(),
            amount_cents: 0,
        })
    }

    fn verify_checkout_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        signatures_match(&self.sign_checkout(order_id, payment_id), signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> WebhookVerification {
        if signatures_match(&self.sign_webhook(payload), signature) {
            WebhookVerification::Valid
        } else {
            WebhookVerification::Invalid
        }
    }

    async fn refund(&self, _payment_id: &str, amount_cents: Option<i64>) -> Result<GatewayRefund> {
        Ok(GatewayRefund {
            refund_id: format!("rfnd_mock_{}", Uuid::new_v4().simple()),
            amount_cents: amount_cents.unwrap_or(0),
        })
    }
}
