use serde::{Deserialize, Serialize};

/// An end-user account scoped to one app, optionally bound to a consumed
/// license. Expiry and activity are derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: String,
    pub app_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hwid: Option<String>,
    /// The consumed license key; None for owner-created direct accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    pub banned: bool,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<i64>,
    pub login_count: i64,
    pub created_at: i64,
}

impl Client {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn is_active(&self, now: i64) -> bool {
        !self.banned && !self.is_expired(now)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterClient {
    pub app_id: String,
    pub key: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientLogin {
    pub app_id: String,
    pub app_secret: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateSession {
    pub app_id: String,
    pub app_secret: String,
    pub username: String,
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Owner-created account with no license involved.
#[derive(Debug, Deserialize)]
pub struct CreateDirectClient {
    pub app_id: String,
    pub username: String,
    pub password: String,
    pub expires_at: i64,
    #[serde(default)]
    pub hwid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendClient {
    pub days: i64,
}
