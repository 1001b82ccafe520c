use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default strings for every client-facing rejection an app can customize.
/// Unknown keys are rejected on update; unset keys fall back to these.
pub const ERROR_MESSAGE_DEFAULTS: [(&str, &str); 19] = [
    ("app_paused", "This application is currently paused"),
    ("license_not_found", "Invalid license key"),
    ("license_used", "This license key has already been used"),
    ("license_banned", "This license key is banned"),
    ("license_revoked", "This license key has been revoked"),
    ("license_expired", "This license key has expired"),
    (
        "custom_keys_disabled",
        "Custom license keys are not allowed for this application",
    ),
    ("key_already_exists", "This license key already exists"),
    (
        "username_too_short",
        "Username must be at least 3 characters",
    ),
    ("username_taken", "This username is already taken"),
    ("user_not_found", "User not found"),
    ("invalid_password", "Invalid password"),
    ("user_banned", "This account is banned"),
    ("user_expired", "This account has expired"),
    ("hwid_mismatch", "Hardware ID mismatch"),
    ("session_invalid", "Session is no longer valid"),
    ("license_limit_reached", "License limit reached for this application"),
    ("reseller_limit_reached", "Reseller license limit reached"),
    (
        "reseller_not_permitted",
        "Reseller is not permitted to perform this action",
    ),
];

pub fn is_known_error_message_key(key: &str) -> bool {
    ERROR_MESSAGE_DEFAULTS.iter().any(|(k, _)| *k == key)
}

/// Per-app behavior toggles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AppSettings {
    /// Bind clients to the first-seen hardware id and reject mismatches.
    #[serde(default)]
    pub hwid_lock: bool,
    /// Allow owners/resellers to supply their own license keys.
    #[serde(default)]
    pub allow_custom_license_key: bool,
}

/// A tenant application. `app_id` is the globally unique public identifier
/// (also the primary key); `app_secret` is generated once and immutable.
#[derive(Debug, Clone, Serialize)]
pub struct App {
    pub app_id: String,
    pub app_secret: String,
    #[serde(skip_serializing)]
    pub owner_id: String,
    pub name: String,
    pub paused: bool,
    pub settings: AppSettings,
    /// Only the overridden messages; defaults are merged at read time.
    #[serde(skip_serializing)]
    pub error_message_overrides: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl App {
    /// Resolve a client-facing message, preferring the app's override.
    pub fn error_message(&self, key: &str) -> String {
        if let Some(custom) = self.error_message_overrides.get(key) {
            return custom.clone();
        }
        ERROR_MESSAGE_DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .unwrap_or_else(|| "Request rejected".to_string())
    }

    /// The full message map: defaults overlaid with this app's overrides.
    pub fn effective_error_messages(&self) -> BTreeMap<String, String> {
        let mut messages: BTreeMap<String, String> = ERROR_MESSAGE_DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (k, v) in &self.error_message_overrides {
            messages.insert(k.clone(), v.clone());
        }
        messages
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApp {
    pub name: String,
    #[serde(default)]
    pub settings: AppSettings,
}

#[derive(Debug, Deserialize)]
pub struct UpdateApp {
    pub name: Option<String>,
    pub paused: Option<bool>,
    pub hwid_lock: Option<bool>,
    pub allow_custom_license_key: Option<bool>,
}

/// PUT /apps/{id}/error-messages body: a partial map of overrides.
/// An empty-string value resets that key to its default.
#[derive(Debug, Deserialize)]
pub struct UpdateErrorMessages {
    #[serde(flatten)]
    pub messages: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct AppStats {
    pub licenses_total: i64,
    pub licenses_active: i64,
    pub licenses_used: i64,
    pub licenses_banned: i64,
    pub licenses_revoked: i64,
    pub clients_total: i64,
    pub clients_banned: i64,
    pub resellers_total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_overrides(overrides: &[(&str, &str)]) -> App {
        App {
            app_id: "a".into(),
            app_secret: "s".into(),
            owner_id: "o".into(),
            name: "test".into(),
            paused: false,
            settings: AppSettings::default(),
            error_message_overrides: overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn defaults_cover_all_nineteen_keys() {
        assert_eq!(ERROR_MESSAGE_DEFAULTS.len(), 19);
        let app = app_with_overrides(&[]);
        assert_eq!(app.effective_error_messages().len(), 19);
    }

    #[test]
    fn override_wins_and_others_fall_back() {
        let app = app_with_overrides(&[("license_expired", "Key lapsed, buy a new one")]);
        assert_eq!(app.error_message("license_expired"), "Key lapsed, buy a new one");
        assert_eq!(
            app.error_message("license_banned"),
            "This license key is banned"
        );
    }
}
