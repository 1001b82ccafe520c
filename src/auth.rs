//! Bearer-token issuance and verification for the owner and reseller consoles.
//!
//! Tokens are HS256 JWTs carrying the account id as subject and a role claim
//! so a reseller token can never be replayed against owner routes.

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const TOKEN_TTL_HOURS: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    Owner,
    Reseller,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoleClaims {
    role: TokenRole,
}

#[derive(Clone)]
pub struct TokenKeys {
    key: HS256Key,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            key: HS256Key::from_bytes(secret.as_bytes()),
        }
    }

    pub fn issue(&self, subject: &str, role: TokenRole) -> Result<String> {
        let claims = Claims::with_custom_claims(
            RoleClaims { role },
            Duration::from_hours(TOKEN_TTL_HOURS),
        )
        .with_subject(subject);

        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))
    }

    /// Verify a token and return its subject and role.
    pub fn verify(&self, token: &str) -> Result<(String, TokenRole)> {
        let claims = self
            .key
            .verify_token::<RoleClaims>(token, None)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

        let subject = claims
            .subject
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;

        Ok((subject, claims.custom.role))
    }
}
