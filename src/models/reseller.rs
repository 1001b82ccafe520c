use serde::{Deserialize, Serialize};

use crate::entitlements::UNLIMITED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResellerAction {
    Create,
    BanUnban,
    EditExpiry,
    Delete,
}

/// Permission flags an owner grants a reseller. `delete` is owner-only and
/// is forced false no matter what the request carried.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AllowedActions {
    pub create: bool,
    pub ban_unban: bool,
    pub edit_expiry: bool,
    pub delete: bool,
}

impl AllowedActions {
    pub fn new(create: bool, ban_unban: bool, edit_expiry: bool) -> Self {
        Self {
            create,
            ban_unban,
            edit_expiry,
            delete: false,
        }
    }
}

impl Default for AllowedActions {
    fn default() -> Self {
        Self::new(true, false, false)
    }
}

/// Wire form of the flags. Any `delete: true` in a request is ignored.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AllowedActionsInput {
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub ban_unban: bool,
    #[serde(default)]
    pub edit_expiry: bool,
    #[serde(default)]
    #[allow(dead_code)]
    pub delete: bool,
}

impl From<AllowedActionsInput> for AllowedActions {
    fn from(input: AllowedActionsInput) -> Self {
        AllowedActions::new(input.create, input.ban_unban, input.edit_expiry)
    }
}

/// A delegate identity scoped to exactly one app.
#[derive(Debug, Clone, Serialize)]
pub struct Reseller {
    pub id: String,
    pub app_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// -1 = unlimited
    pub license_limit: i64,
    pub used_licenses: i64,
    pub active: bool,
    pub allowed_actions: AllowedActions,
    pub created_at: i64,
}

impl Reseller {
    pub fn can_create_license(&self) -> bool {
        self.active
            && (self.license_limit == UNLIMITED || self.used_licenses < self.license_limit)
    }

    pub fn has_permission(&self, action: ResellerAction) -> bool {
        if !self.active {
            return false;
        }
        match action {
            ResellerAction::Create => self.allowed_actions.create,
            ResellerAction::BanUnban => self.allowed_actions.ban_unban,
            ResellerAction::EditExpiry => self.allowed_actions.edit_expiry,
            ResellerAction::Delete => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReseller {
    pub app_id: String,
    pub username: String,
    pub password: String,
    /// -1 = unlimited (clamped for free-plan owners)
    #[serde(default = "default_license_limit")]
    pub license_limit: i64,
    #[serde(default)]
    pub allowed_actions: AllowedActionsInput,
}

fn default_license_limit() -> i64 {
    UNLIMITED
}

#[derive(Debug, Deserialize)]
pub struct UpdateReseller {
    pub license_limit: Option<i64>,
    pub active: Option<bool>,
    pub allowed_actions: Option<AllowedActionsInput>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResellerLogin {
    pub app_id: String,
    pub username: String,
    pub password: String,
}

/// POST /resellers/auth/licenses body: bulk creation against own quota.
#[derive(Debug, Deserialize)]
pub struct ResellerBulkCreateLicenses {
    pub expires_at: i64,
    #[serde(default = "default_count")]
    pub count: i64,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_count() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct ResellerDashboard {
    pub app_id: String,
    pub app_name: String,
    pub license_limit: i64,
    pub used_licenses: i64,
    /// -1 when unlimited
    pub remaining: i64,
    pub licenses_active: i64,
    pub licenses_banned: i64,
    pub licenses_revoked: i64,
    pub licenses_consumed: i64,
}
