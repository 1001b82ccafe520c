//! Row-to-model mapping shared by the query layer.
//!
//! Each model has a COLS constant listing its columns in the order the
//! matching `FromRow` impl reads them; queries interpolate the constant so
//! SELECT lists and mapping code cannot drift apart.

use std::collections::BTreeMap;

use rusqlite::{Connection, Params, Row};

use crate::error::Result;
use crate::models::*;

pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query_map(params, |row| T::from_row(row))?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub const USER_COLS: &str = "id, email, name, password_hash, plan, created_at, updated_at";

impl FromRow for User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            password_hash: row.get(3)?,
            plan: row.get::<_, String>(4)?.parse().unwrap(),
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

pub const APP_COLS: &str = "app_id, app_secret, owner_id, name, paused, hwid_lock, \
     allow_custom_license_key, error_messages, created_at, updated_at";

impl FromRow for App {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let overrides_json: String = row.get(7)?;
        let error_message_overrides: BTreeMap<String, String> =
            serde_json::from_str(&overrides_json).unwrap_or_default();
        Ok(App {
            app_id: row.get(0)?,
            app_secret: row.get(1)?,
            owner_id: row.get(2)?,
            name: row.get(3)?,
            paused: row.get::<_, i32>(4)? != 0,
            settings: AppSettings {
                hwid_lock: row.get::<_, i32>(5)? != 0,
                allow_custom_license_key: row.get::<_, i32>(6)? != 0,
            },
            error_message_overrides,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

pub const LICENSE_COLS: &str = "id, app_id, key, created_by_user, created_by_type, reseller_id, \
     used_by, status, expires_at, note, created_at";

impl FromRow for License {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            app_id: row.get(1)?,
            key: row.get(2)?,
            created_by_user: row.get(3)?,
            created_by_type: row.get::<_, String>(4)?.parse().unwrap(),
            reseller_id: row.get(5)?,
            consumption: Consumption::from_used_by(row.get(6)?),
            status: row.get::<_, String>(7)?.parse().unwrap(),
            expires_at: row.get(8)?,
            note: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

pub const RESELLER_COLS: &str = "id, app_id, username, password_hash, license_limit, \
     used_licenses, active, allow_create, allow_ban_unban, allow_edit_expiry, created_at";

impl FromRow for Reseller {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Reseller {
            id: row.get(0)?,
            app_id: row.get(1)?,
            username: row.get(2)?,
            password_hash: row.get(3)?,
            license_limit: row.get(4)?,
            used_licenses: row.get(5)?,
            active: row.get::<_, i32>(6)? != 0,
            allowed_actions: AllowedActions::new(
                row.get::<_, i32>(7)? != 0,
                row.get::<_, i32>(8)? != 0,
                row.get::<_, i32>(9)? != 0,
            ),
            created_at: row.get(10)?,
        })
    }
}

pub const CLIENT_COLS: &str = "id, app_id, username, password_hash, hwid, license_key, banned, \
     expires_at, last_login, login_count, created_at";

impl FromRow for Client {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Client {
            id: row.get(0)?,
            app_id: row.get(1)?,
            username: row.get(2)?,
            password_hash: row.get(3)?,
            hwid: row.get(4)?,
            license_key: row.get(5)?,
            banned: row.get::<_, i32>(6)? != 0,
            expires_at: row.get(7)?,
            last_login: row.get(8)?,
            login_count: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

pub const PAYMENT_COLS: &str = "id, user_id, order_id, payment_id, amount_cents, currency, \
     status, plan, coupon, created_at, updated_at";

impl FromRow for Payment {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            order_id: row.get(2)?,
            payment_id: row.get(3)?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            status: row.get::<_, String>(6)?.parse().unwrap(),
            plan: row.get::<_, String>(7)?.parse().unwrap(),
            coupon: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

pub const REFUND_COLS: &str = "id, payment_ref, refund_id, amount_cents, created_at";

impl FromRow for Refund {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Refund {
            id: row.get(0)?,
            payment_ref: row.get(1)?,
            refund_id: row.get(2)?,
            amount_cents: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

pub const COUPON_COLS: &str = "id, code, percent_off, active, expires_at";

impl FromRow for Coupon {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Coupon {
            id: row.get(0)?,
            code: row.get(1)?,
            percent_off: row.get(2)?,
            active: row.get::<_, i32>(3)? != 0,
            expires_at: row.get(4)?,
        })
    }
}

pub const AUDIT_LOG_COLS: &str = "id, timestamp, actor_type, actor_id, action, resource_type, \
     resource_id, details, ip_address, user_agent";

impl FromRow for AuditLog {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let details_str: Option<String> = row.get(7)?;
        Ok(AuditLog {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            actor_type: row.get::<_, String>(2)?.parse().unwrap(),
            actor_id: row.get(3)?,
            action: row.get(4)?,
            resource_type: row.get(5)?,
            resource_id: row.get(6)?,
            details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
        })
    }
}
