pub mod from_row;
pub mod queries;

use std::sync::Arc;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::auth::TokenKeys;
use crate::error::Result;
use crate::payments::PaymentGateway;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub tokens: TokenKeys,
    pub gateway: Arc<dyn PaymentGateway>,
    pub audit_log_enabled: bool,
    pub premium_price_cents: i64,
    pub currency: String,
}

/// Writers wait for the lock instead of failing with SQLITE_BUSY, so a lost
/// race surfaces as a rule error (e.g. used key) rather than a 500.
fn busy_timeout(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(std::time::Duration::from_secs(5))
}

pub fn create_pool(database_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|c| busy_timeout(c));
    let pool = r2d2::Pool::new(manager)
        .map_err(|e| crate::error::AppError::Internal(format!("Failed to create pool: {}", e)))?;
    let conn = pool.get()?;
    init_schema(&conn)?;
    Ok(pool)
}

pub fn create_in_memory_pool() -> Result<DbPool> {
    // Single connection so every pool checkout sees the same in-memory DB.
    let manager = SqliteConnectionManager::memory().with_init(|c| busy_timeout(c));
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| crate::error::AppError::Internal(format!("Failed to create pool: {}", e)))?;
    let conn = pool.get()?;
    init_schema(&conn)?;
    Ok(pool)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            password_hash TEXT NOT NULL,
            plan TEXT NOT NULL DEFAULT 'free',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS apps (
            app_id TEXT PRIMARY KEY,
            app_secret TEXT NOT NULL,
            owner_id TEXT NOT NULL REFERENCES users(id),
            name TEXT NOT NULL,
            paused INTEGER NOT NULL DEFAULT 0,
            hwid_lock INTEGER NOT NULL DEFAULT 0,
            allow_custom_license_key INTEGER NOT NULL DEFAULT 0,
            error_messages TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_apps_owner ON apps(owner_id);

        CREATE TABLE IF NOT EXISTS licenses (
            id TEXT PRIMARY KEY,
            app_id TEXT NOT NULL REFERENCES apps(app_id),
            key TEXT NOT NULL UNIQUE,
            created_by_user TEXT NOT NULL,
            created_by_type TEXT NOT NULL,
            reseller_id TEXT,
            used_by TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            expires_at INTEGER NOT NULL,
            note TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_licenses_app ON licenses(app_id);
        CREATE INDEX IF NOT EXISTS idx_licenses_reseller ON licenses(reseller_id);

        CREATE TABLE IF NOT EXISTS resellers (
            id TEXT PRIMARY KEY,
            app_id TEXT NOT NULL REFERENCES apps(app_id),
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            license_limit INTEGER NOT NULL DEFAULT -1,
            used_licenses INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            allow_create INTEGER NOT NULL DEFAULT 1,
            allow_ban_unban INTEGER NOT NULL DEFAULT 0,
            allow_edit_expiry INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(app_id, username)
        );

        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            app_id TEXT NOT NULL REFERENCES apps(app_id),
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            hwid TEXT,
            license_key TEXT,
            banned INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER NOT NULL,
            last_login INTEGER,
            login_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            UNIQUE(app_id, username)
        );

        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            order_id TEXT NOT NULL UNIQUE,
            payment_id TEXT,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            plan TEXT NOT NULL,
            coupon TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS refunds (
            id TEXT PRIMARY KEY,
            payment_ref TEXT NOT NULL REFERENCES payments(id),
            refund_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS coupons (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            percent_off INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            expires_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            actor_type TEXT NOT NULL,
            actor_id TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
        ",
    )?;
    Ok(())
}
