use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// HS256 secret for owner/reseller bearer tokens.
    pub jwt_secret: String,
    /// Enable/disable audit logging entirely
    pub audit_log_enabled: bool,
    /// Days to retain audit logs before purging (0 = never purge)
    pub audit_log_retention_days: i64,
    /// Premium plan price, in the currency's smallest unit.
    pub premium_price_cents: i64,
    pub currency: String,
    /// Razorpay credentials. When absent (or in dev mode) the mock gateway
    /// is selected at startup instead.
    pub razorpay_key_id: Option<String>,
    pub razorpay_key_secret: Option<String>,
    pub razorpay_webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYMINT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let audit_log_enabled = env::var("AUDIT_LOG_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let audit_log_retention_days: i64 = env::var("AUDIT_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        let premium_price_cents: i64 = env::var("PREMIUM_PRICE_CENTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(49900);

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(s) => s,
            Err(_) if dev_mode => "keymint-dev-secret".to_string(),
            Err(_) => {
                // Fail at startup rather than serving forgeable tokens.
                panic!("JWT_SECRET must be set outside dev mode");
            }
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keymint.db".to_string()),
            dev_mode,
            jwt_secret,
            audit_log_enabled,
            audit_log_retention_days,
            premium_price_cents,
            currency: env::var("CURRENCY").unwrap_or_else(|_| "INR".to_string()),
            razorpay_key_id: env::var("RAZORPAY_KEY_ID").ok(),
            razorpay_key_secret: env::var("RAZORPAY_KEY_SECRET").ok(),
            razorpay_webhook_secret: env::var("RAZORPAY_WEBHOOK_SECRET").ok(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
