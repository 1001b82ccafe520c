use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{
    hmac_hex, signatures_match, GatewayOrder, GatewayPayment, GatewayRefund, PaymentGateway,
    PaymentProvider, WebhookVerification,
};

const API_BASE: &str = "https://api.razorpay.com/v1";

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    order_id: Option<String>,
    status: String,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct RefundApiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    amount: i64,
}

#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    webhook_secret: Option<String>,
}

impl RazorpayClient {
    pub fn new(key_id: String, key_secret: String, webhook_secret: Option<String>) -> Self {
        Self {
            client: Client::new(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }

    fn auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.key_id, self.key_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Razorpay returned {}: {}",
                status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Razorpay response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    async fn create_order(
        &self,
        amount_cents: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        let response = self
            .client
            .post(format!("{}/orders", API_BASE))
            .header("Authorization", self.auth_header())
            .json(&CreateOrderRequest {
                amount: amount_cents,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Razorpay request failed: {}", e)))?;

        let order: OrderResponse = Self::parse_response(response).await?;
        Ok(GatewayOrder {
            order_id: order.id,
            amount_cents: order.amount,
            currency: order.currency,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment> {
        let response = self
            .client
            .get(format!("{}/payments/{}", API_BASE, payment_id))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Razorpay request failed: {}", e)))?;

        let payment: PaymentResponse = Self::parse_response(response).await?;
        Ok(GatewayPayment {
            payment_id: payment.id,
            order_id: payment.order_id,
            status: payment.status,
            amount_cents: payment.amount,
        })
    }

    fn verify_checkout_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        let payload = format!("{}|{}", order_id, payment_id);
        let expected = hmac_hex(&self.key_secret, payload.as_bytes());
        signatures_match(&expected, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> WebhookVerification {
        let Some(secret) = &self.webhook_secret else {
            return WebhookVerification::NotConfigured;
        };
        let expected = hmac_hex(secret, payload);
        if signatures_match(&expected, signature) {
            WebhookVerification::Valid
        } else {
            WebhookVerification::Invalid
        }
    }

    async fn refund(&self, payment_id: &str, amount_cents: Option<i64>) -> Result<GatewayRefund> {
        let response = self
            .client
            .post(format!("{}/payments/{}/refund", API_BASE, payment_id))
            .header("Authorization", self.auth_header())
            .json(&RefundApiRequest {
                amount: amount_cents,
            })
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Razorpay request failed: {}", e)))?;

        let refund: RefundResponse = Self::parse_response(response).await?;
        Ok(GatewayRefund {
            refund_id: refund.id,
            amount_cents: refund.amount,
        })
    }
}
