use chrono::Utc;
use rusqlite::{params, types::Value, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::entitlements::{Plan, UNLIMITED};
use crate::error::{AppError, Result};
use crate::models::*;
use crate::util::SECONDS_PER_DAY;

use super::from_row::{
    query_all, query_one, APP_COLS, AUDIT_LOG_COLS, CLIENT_COLS, COUPON_COLS, LICENSE_COLS,
    PAYMENT_COLS, REFUND_COLS, RESELLER_COLS, USER_COLS,
};

/// Generation retry budget for unique keys/app ids. Collisions on 12+ random
/// bytes are effectively impossible; hitting the cap means something is
/// broken and we fail loudly instead of spinning.
const MAX_GENERATION_ATTEMPTS: u32 = 8;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn random_hex(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query for efficiency.
struct UpdateBuilder {
    table: &'static str,
    id_column: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id_column: &'static str, id: &str) -> Self {
        Self {
            table,
            id_column,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table,
            sets.join(", "),
            self.id_column
        );
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

pub fn create_user(
    conn: &Connection,
    email: &str,
    name: Option<&str>,
    password_hash: &str,
) -> Result<User> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, email, name, password_hash, plan, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'free', ?5, ?6)",
        params![&id, email, name, password_hash, now, now],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email is already registered".into())
        } else {
            e.into()
        }
    })?;

    Ok(User {
        id,
        email: email.to_string(),
        name: name.map(String::from),
        password_hash: password_hash.to_string(),
        plan: Plan::Free,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        params![id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        params![email],
    )
}

/// The single plan mutation point. Limits are derived from the plan at read
/// time, so no other field needs touching.
pub fn set_user_plan(conn: &Connection, user_id: &str, plan: Plan) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET plan = ?1, updated_at = ?2 WHERE id = ?3",
        params![plan.as_ref(), now(), user_id],
    )?;
    Ok(affected > 0)
}

pub fn count_apps_for_owner(conn: &Connection, owner_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM apps WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Apps ============

fn generate_app_id() -> String {
    random_hex(8)
}

fn generate_app_secret() -> String {
    random_hex(16)
}

/// Create an app, enforcing the owner's plan quota and app-id uniqueness
/// inside one write transaction. The unique index is the source of truth;
/// a duplicate insert is treated as a retry trigger, not a failure.
pub fn create_app(conn: &mut Connection, owner: &User, input: &CreateApp) -> Result<App> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: i64 = tx.query_row(
        "SELECT COUNT(*) FROM apps WHERE owner_id = ?1",
        params![&owner.id],
        |row| row.get(0),
    )?;
    if !owner.plan.can_create_app(current) {
        return Err(AppError::Forbidden(format!(
            "App limit reached for the {} plan ({}/{})",
            owner.plan.as_ref(),
            current,
            owner.plan.limits().max_apps
        )));
    }

    let app_secret = generate_app_secret();
    let now = now();

    for attempt in 0..MAX_GENERATION_ATTEMPTS {
        let app_id = generate_app_id();
        let result = tx.execute(
            "INSERT INTO apps (app_id, app_secret, owner_id, name, paused, hwid_lock,
                               allow_custom_license_key, error_messages, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, '{}', ?7, ?8)",
            params![
                &app_id,
                &app_secret,
                &owner.id,
                &input.name,
                input.settings.hwid_lock as i32,
                input.settings.allow_custom_license_key as i32,
                now,
                now
            ],
        );
        match result {
            Ok(_) => {
                tx.commit()?;
                return Ok(App {
                    app_id,
                    app_secret,
                    owner_id: owner.id.clone(),
                    name: input.name.clone(),
                    paused: false,
                    settings: input.settings,
                    error_message_overrides: Default::default(),
                    created_at: now,
                    updated_at: now,
                });
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!("app_id collision on attempt {}, regenerating", attempt + 1);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Internal(
        "Exhausted app id generation attempts".into(),
    ))
}

pub fn get_app(conn: &Connection, app_id: &str) -> Result<Option<App>> {
    query_one(
        conn,
        &format!("SELECT {} FROM apps WHERE app_id = ?1", APP_COLS),
        params![app_id],
    )
}

/// Fetch an app only if it belongs to the given owner. A foreign app is
/// indistinguishable from a missing one.
pub fn get_app_owned(conn: &Connection, app_id: &str, owner_id: &str) -> Result<Option<App>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM apps WHERE app_id = ?1 AND owner_id = ?2",
            APP_COLS
        ),
        params![app_id, owner_id],
    )
}

/// Capability-style lookup for client endpoints: both halves must match.
pub fn get_app_by_credentials(
    conn: &Connection,
    app_id: &str,
    app_secret: &str,
) -> Result<Option<App>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM apps WHERE app_id = ?1 AND app_secret = ?2",
            APP_COLS
        ),
        params![app_id, app_secret],
    )
}

pub fn list_apps_for_owner(conn: &Connection, owner_id: &str) -> Result<Vec<App>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM apps WHERE owner_id = ?1 ORDER BY created_at DESC",
            APP_COLS
        ),
        params![owner_id],
    )
}

pub fn update_app(conn: &Connection, app_id: &str, input: &UpdateApp) -> Result<bool> {
    UpdateBuilder::new("apps", "app_id", app_id)
        .with_updated_at()
        .set_opt("name", input.name.clone())
        .set_opt("paused", input.paused.map(|v| v as i32))
        .set_opt("hwid_lock", input.hwid_lock.map(|v| v as i32))
        .set_opt(
            "allow_custom_license_key",
            input.allow_custom_license_key.map(|v| v as i32),
        )
        .execute(conn)
}

pub fn set_error_message_overrides(
    conn: &Connection,
    app_id: &str,
    overrides: &std::collections::BTreeMap<String, String>,
) -> Result<bool> {
    let json = serde_json::to_string(overrides)?;
    let affected = conn.execute(
        "UPDATE apps SET error_messages = ?1, updated_at = ?2 WHERE app_id = ?3",
        params![json, now(), app_id],
    )?;
    Ok(affected > 0)
}

/// Delete an app and everything under it in one transaction.
pub fn delete_app_cascade(conn: &mut Connection, app_id: &str) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM licenses WHERE app_id = ?1", params![app_id])?;
    tx.execute("DELETE FROM clients WHERE app_id = ?1", params![app_id])?;
    tx.execute("DELETE FROM resellers WHERE app_id = ?1", params![app_id])?;
    let deleted = tx.execute("DELETE FROM apps WHERE app_id = ?1", params![app_id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

pub fn app_stats(conn: &Connection, app_id: &str) -> Result<AppStats> {
    let count = |sql: &str| -> Result<i64> {
        conn.query_row(sql, params![app_id], |row| row.get(0))
            .map_err(Into::into)
    };

    Ok(AppStats {
        licenses_total: count("SELECT COUNT(*) FROM licenses WHERE app_id = ?1")?,
        licenses_active: count(
            "SELECT COUNT(*) FROM licenses WHERE app_id = ?1 AND status = 'active'",
        )?,
        licenses_used: count(
            "SELECT COUNT(*) FROM licenses WHERE app_id = ?1 AND used_by IS NOT NULL",
        )?,
        licenses_banned: count(
            "SELECT COUNT(*) FROM licenses WHERE app_id = ?1 AND status = 'banned'",
        )?,
        licenses_revoked: count(
            "SELECT COUNT(*) FROM licenses WHERE app_id = ?1 AND status = 'revoked'",
        )?,
        clients_total: count("SELECT COUNT(*) FROM clients WHERE app_id = ?1")?,
        clients_banned: count("SELECT COUNT(*) FROM clients WHERE app_id = ?1 AND banned = 1")?,
        resellers_total: count("SELECT COUNT(*) FROM resellers WHERE app_id = ?1")?,
    })
}

// ============ Licenses ============

/// 24 hex chars, matching the format end users redeem.
fn generate_license_key() -> String {
    random_hex(12)
}

struct LicenseInsert<'a> {
    app_id: &'a str,
    created_by_user: &'a str,
    created_by_type: CreatorType,
    reseller_id: Option<&'a str>,
    expires_at: i64,
    note: Option<&'a str>,
}

/// Insert a license with a generated key, retrying on key collision.
/// The unique index on `key` is the arbiter; an insert failure from a
/// duplicate is a silent retry trigger.
fn insert_license_generated(tx: &Connection, insert: &LicenseInsert<'_>) -> Result<License> {
    for attempt in 0..MAX_GENERATION_ATTEMPTS {
        let key = generate_license_key();
        match try_insert_license(tx, &key, insert) {
            Ok(license) => return Ok(license),
            Err(AppError::Database(e)) if is_unique_violation(&e) => {
                tracing::warn!(
                    "license key collision on attempt {}, regenerating",
                    attempt + 1
                );
            }
            Err(e) => return Err(e),
        }
    }
    Err(AppError::Internal(
        "Exhausted license key generation attempts".into(),
    ))
}

fn try_insert_license(tx: &Connection, key: &str, insert: &LicenseInsert<'_>) -> Result<License> {
    let id = gen_id();
    let now = now();
    tx.execute(
        "INSERT INTO licenses (id, app_id, key, created_by_user, created_by_type, reseller_id,
                               used_by, status, expires_at, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 'active', ?7, ?8, ?9)",
        params![
            &id,
            insert.app_id,
            key,
            insert.created_by_user,
            insert.created_by_type.as_ref(),
            insert.reseller_id,
            insert.expires_at,
            insert.note,
            now
        ],
    )?;
    Ok(License {
        id,
        app_id: insert.app_id.to_string(),
        key: key.to_string(),
        created_by_user: insert.created_by_user.to_string(),
        created_by_type: insert.created_by_type,
        reseller_id: insert.reseller_id.map(String::from),
        consumption: Consumption::Unconsumed,
        status: LicenseStatus::Active,
        expires_at: insert.expires_at,
        note: insert.note.map(String::from),
        created_at: now,
    })
}

/// Owner-side license creation: plan quota and the optional custom key are
/// validated inside the same write transaction as the insert.
pub fn create_license_as_owner(
    conn: &mut Connection,
    app: &App,
    owner: &User,
    input: &CreateLicense,
) -> Result<License> {
    if input.expires_at <= now() {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: i64 = tx.query_row(
        "SELECT COUNT(*) FROM licenses WHERE app_id = ?1",
        params![&app.app_id],
        |row| row.get(0),
    )?;
    if !owner.plan.can_create_license(current) {
        return Err(AppError::Forbidden(
            app.error_message("license_limit_reached"),
        ));
    }

    let insert = LicenseInsert {
        app_id: &app.app_id,
        created_by_user: &owner.id,
        created_by_type: CreatorType::Owner,
        reseller_id: None,
        expires_at: input.expires_at,
        note: input.note.as_deref(),
    };

    let license = match &input.key {
        Some(custom_key) => {
            if !app.settings.allow_custom_license_key {
                return Err(AppError::Forbidden(
                    app.error_message("custom_keys_disabled"),
                ));
            }
            try_insert_license(&tx, custom_key, &insert).map_err(|e| match e {
                AppError::Database(db) if is_unique_violation(&db) => {
                    AppError::Conflict(app.error_message("key_already_exists"))
                }
                other => other,
            })?
        }
        None => insert_license_generated(&tx, &insert)?,
    };

    tx.commit()?;
    Ok(license)
}

/// Reseller-side bulk creation. Both quotas (the reseller's own and the
/// owner's app-level limit) are re-checked inside the transaction, and the
/// reseller's usage counter moves in the same commit.
pub fn create_licenses_as_reseller(
    conn: &mut Connection,
    app: &App,
    owner_plan: Plan,
    reseller: &Reseller,
    expires_at: i64,
    note: Option<&str>,
    count: i64,
) -> Result<Vec<License>> {
    if count < 1 || count > 100 {
        return Err(AppError::BadRequest(
            "count must be between 1 and 100".into(),
        ));
    }
    if expires_at <= now() {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // Re-read usage under the write lock; the context snapshot may be stale.
    let row: Option<(i64, i64)> = tx
        .query_row(
            "SELECT license_limit, used_licenses FROM resellers WHERE id = ?1 AND active = 1",
            params![&reseller.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((limit, used)) = row else {
        return Err(AppError::Forbidden(
            app.error_message("reseller_not_permitted"),
        ));
    };
    if limit != UNLIMITED && used + count > limit {
        return Err(AppError::Forbidden(
            app.error_message("reseller_limit_reached"),
        ));
    }

    let current: i64 = tx.query_row(
        "SELECT COUNT(*) FROM licenses WHERE app_id = ?1",
        params![&app.app_id],
        |row| row.get(0),
    )?;
    let app_limit = owner_plan.limits().max_licenses_per_app;
    if app_limit != UNLIMITED && current + count > app_limit {
        return Err(AppError::Forbidden(
            app.error_message("license_limit_reached"),
        ));
    }

    let mut created = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let license = insert_license_generated(
            &tx,
            &LicenseInsert {
                app_id: &app.app_id,
                created_by_user: &reseller.id,
                created_by_type: CreatorType::Reseller,
                reseller_id: Some(&reseller.id),
                expires_at,
                note,
            },
        )?;
        created.push(license);
    }

    tx.execute(
        "UPDATE resellers SET used_licenses = used_licenses + ?1 WHERE id = ?2",
        params![count, &reseller.id],
    )?;

    tx.commit()?;
    Ok(created)
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        params![id],
    )
}

pub fn get_license_by_key(conn: &Connection, key: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE key = ?1", LICENSE_COLS),
        params![key],
    )
}

pub fn list_licenses_for_app(conn: &Connection, app_id: &str) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE app_id = ?1 ORDER BY created_at DESC",
            LICENSE_COLS
        ),
        params![app_id],
    )
}

pub fn list_licenses_for_reseller(conn: &Connection, reseller_id: &str) -> Result<Vec<License>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE reseller_id = ?1 ORDER BY created_at DESC",
            LICENSE_COLS
        ),
        params![reseller_id],
    )
}

/// Compare-and-swap a license between two stored statuses. Returns false if
/// the license was not in `from` (lost race or invalid transition).
pub fn swap_license_status(
    conn: &Connection,
    id: &str,
    from: LicenseStatus,
    to: LicenseStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![to.as_ref(), id, from.as_ref()],
    )?;
    Ok(affected > 0)
}

/// Revocation is unconditional and terminal.
pub fn revoke_license(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET status = 'revoked' WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Extends from the current expiry, not from now, so extensions accumulate
/// even when the key has already lapsed.
pub fn extend_license_expiry(conn: &Connection, id: &str, days: i64) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET expires_at = expires_at + ?1 WHERE id = ?2",
        params![days * SECONDS_PER_DAY, id],
    )?;
    Ok(())
}

pub fn update_license_note(conn: &Connection, id: &str, note: Option<&str>) -> Result<bool> {
    UpdateBuilder::new("licenses", "id", id)
        .set_nullable("note", note.map(String::from))
        .execute(conn)
}

/// Delete a license; a reseller-created one gives its slot back to the
/// reseller in the same transaction (floored at zero).
pub fn delete_license(conn: &mut Connection, license: &License) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let deleted = tx.execute("DELETE FROM licenses WHERE id = ?1", params![&license.id])?;
    if deleted > 0 {
        if let Some(reseller_id) = &license.reseller_id {
            tx.execute(
                "UPDATE resellers SET used_licenses = MAX(used_licenses - 1, 0) WHERE id = ?1",
                params![reseller_id],
            )?;
        }
    }
    tx.commit()?;
    Ok(deleted > 0)
}

/// Bulk removal of an app's owner-created licenses only.
pub fn bulk_delete_owner_licenses(conn: &Connection, app_id: &str) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM licenses WHERE app_id = ?1 AND created_by_type = 'owner'",
        params![app_id],
    )?;
    Ok(deleted)
}

// ============ Clients ============

/// Atomically create a client from a license redemption.
///
/// The consumption check happens at the moment of commit: the conditional
/// UPDATE only matches an unconsumed, active license, so two concurrent
/// registrations against the same key produce exactly one client.
pub fn register_client_via_license(
    conn: &mut Connection,
    app: &App,
    license: &License,
    username: &str,
    password_hash: &str,
    hwid: Option<&str>,
) -> Result<Client> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let id = gen_id();
    let now = now();

    tx.execute(
        "INSERT INTO clients (id, app_id, username, password_hash, hwid, license_key, banned,
                              expires_at, last_login, login_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, NULL, 0, ?8)",
        params![
            &id,
            &app.app_id,
            username,
            password_hash,
            hwid,
            &license.key,
            license.expires_at,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(app.error_message("username_taken"))
        } else {
            e.into()
        }
    })?;

    let consumed = tx.execute(
        "UPDATE licenses SET used_by = ?1 WHERE id = ?2 AND used_by IS NULL AND status = 'active'",
        params![&id, &license.id],
    )?;
    if consumed == 0 {
        // Dropping the transaction rolls the client insert back.
        return Err(AppError::Forbidden(app.error_message("license_used")));
    }

    tx.commit()?;

    Ok(Client {
        id,
        app_id: app.app_id.clone(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        hwid: hwid.map(String::from),
        license_key: Some(license.key.clone()),
        banned: false,
        expires_at: license.expires_at,
        last_login: None,
        login_count: 0,
        created_at: now,
    })
}

pub fn create_direct_client(
    conn: &Connection,
    app: &App,
    input: &CreateDirectClient,
    password_hash: &str,
) -> Result<Client> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO clients (id, app_id, username, password_hash, hwid, license_key, banned,
                              expires_at, last_login, login_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, ?6, NULL, 0, ?7)",
        params![
            &id,
            &app.app_id,
            &input.username,
            password_hash,
            &input.hwid,
            input.expires_at,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(app.error_message("username_taken"))
        } else {
            e.into()
        }
    })?;

    Ok(Client {
        id,
        app_id: app.app_id.clone(),
        username: input.username.clone(),
        password_hash: password_hash.to_string(),
        hwid: input.hwid.clone(),
        license_key: None,
        banned: false,
        expires_at: input.expires_at,
        last_login: None,
        login_count: 0,
        created_at: now,
    })
}

pub fn get_client_by_id(conn: &Connection, id: &str) -> Result<Option<Client>> {
    query_one(
        conn,
        &format!("SELECT {} FROM clients WHERE id = ?1", CLIENT_COLS),
        params![id],
    )
}

pub fn get_client_by_username(
    conn: &Connection,
    app_id: &str,
    username: &str,
) -> Result<Option<Client>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM clients WHERE app_id = ?1 AND username = ?2",
            CLIENT_COLS
        ),
        params![app_id, username],
    )
}

pub fn list_clients_for_app(conn: &Connection, app_id: &str) -> Result<Vec<Client>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM clients WHERE app_id = ?1 ORDER BY created_at DESC",
            CLIENT_COLS
        ),
        params![app_id],
    )
}

pub fn set_client_banned(conn: &Connection, id: &str, banned: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE clients SET banned = ?1 WHERE id = ?2",
        params![banned as i32, id],
    )?;
    Ok(affected > 0)
}

pub fn extend_client_expiry(conn: &Connection, id: &str, days: i64) -> Result<()> {
    conn.execute(
        "UPDATE clients SET expires_at = expires_at + ?1 WHERE id = ?2",
        params![days * SECONDS_PER_DAY, id],
    )?;
    Ok(())
}

pub fn reset_client_hwid(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("UPDATE clients SET hwid = NULL WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn set_client_hwid(conn: &Connection, id: &str, hwid: &str) -> Result<()> {
    conn.execute(
        "UPDATE clients SET hwid = ?1 WHERE id = ?2",
        params![hwid, id],
    )?;
    Ok(())
}

pub fn record_client_login(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE clients SET login_count = login_count + 1, last_login = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

/// Delete a client and free its consumed license, if any.
pub fn delete_client(conn: &mut Connection, client: &Client) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "UPDATE licenses SET used_by = NULL WHERE used_by = ?1",
        params![&client.id],
    )?;
    let deleted = tx.execute("DELETE FROM clients WHERE id = ?1", params![&client.id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

// ============ Resellers ============

/// Maximum license_limit a free-plan owner may grant. Free owners cannot
/// normally reach reseller creation at all (max_resellers = 0); the clamp
/// holds if that gate is ever relaxed.
const FREE_PLAN_RESELLER_LICENSE_CAP: i64 = 30;

pub fn create_reseller(
    conn: &mut Connection,
    owner: &User,
    input: &CreateReseller,
    password_hash: &str,
) -> Result<Reseller> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current: i64 = tx.query_row(
        "SELECT COUNT(*) FROM resellers
         WHERE app_id IN (SELECT app_id FROM apps WHERE owner_id = ?1)",
        params![&owner.id],
        |row| row.get(0),
    )?;
    if !owner.plan.can_create_reseller(current) {
        return Err(AppError::Forbidden(format!(
            "Reseller limit reached for the {} plan",
            owner.plan.as_ref()
        )));
    }

    let mut license_limit = input.license_limit;
    if owner.plan == Plan::Free {
        license_limit = if license_limit == UNLIMITED {
            FREE_PLAN_RESELLER_LICENSE_CAP
        } else {
            license_limit.min(FREE_PLAN_RESELLER_LICENSE_CAP)
        };
    }

    let actions: AllowedActions = input.allowed_actions.into();
    let id = gen_id();
    let now = now();

    tx.execute(
        "INSERT INTO resellers (id, app_id, username, password_hash, license_limit, used_licenses,
                                active, allow_create, allow_ban_unban, allow_edit_expiry, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 1, ?6, ?7, ?8, ?9)",
        params![
            &id,
            &input.app_id,
            &input.username,
            password_hash,
            license_limit,
            actions.create as i32,
            actions.ban_unban as i32,
            actions.edit_expiry as i32,
            now
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Reseller username already exists for this app".into())
        } else {
            e.into()
        }
    })?;

    tx.commit()?;

    Ok(Reseller {
        id,
        app_id: input.app_id.clone(),
        username: input.username.clone(),
        password_hash: password_hash.to_string(),
        license_limit,
        used_licenses: 0,
        active: true,
        allowed_actions: actions,
        created_at: now,
    })
}

pub fn get_reseller_by_id(conn: &Connection, id: &str) -> Result<Option<Reseller>> {
    query_one(
        conn,
        &format!("SELECT {} FROM resellers WHERE id = ?1", RESELLER_COLS),
        params![id],
    )
}

pub fn get_reseller_by_login(
    conn: &Connection,
    app_id: &str,
    username: &str,
) -> Result<Option<Reseller>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM resellers WHERE app_id = ?1 AND username = ?2",
            RESELLER_COLS
        ),
        params![app_id, username],
    )
}

pub fn list_resellers_for_app(conn: &Connection, app_id: &str) -> Result<Vec<Reseller>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM resellers WHERE app_id = ?1 ORDER BY created_at DESC",
            RESELLER_COLS
        ),
        params![app_id],
    )
}

pub fn update_reseller(
    conn: &Connection,
    id: &str,
    input: &UpdateReseller,
    new_password_hash: Option<&str>,
) -> Result<bool> {
    let actions = input.allowed_actions.map(AllowedActions::from);
    UpdateBuilder::new("resellers", "id", id)
        .set_opt("license_limit", input.license_limit)
        .set_opt("active", input.active.map(|v| v as i32))
        .set_opt("allow_create", actions.map(|a| a.create as i32))
        .set_opt("allow_ban_unban", actions.map(|a| a.ban_unban as i32))
        .set_opt("allow_edit_expiry", actions.map(|a| a.edit_expiry as i32))
        .set_opt("password_hash", new_password_hash.map(String::from))
        .execute(conn)
}

/// Deletion is blocked while the reseller still has ACTIVE licenses;
/// revoked/banned/consumed history does not block.
pub fn delete_reseller(conn: &mut Connection, id: &str) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let active: i64 = tx.query_row(
        "SELECT COUNT(*) FROM licenses WHERE reseller_id = ?1 AND status = 'active'",
        params![id],
        |row| row.get(0),
    )?;
    if active > 0 {
        return Err(AppError::Conflict(format!(
            "Reseller still has {} active license(s)",
            active
        )));
    }
    let deleted = tx.execute("DELETE FROM resellers WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

pub fn reseller_dashboard(
    conn: &Connection,
    reseller: &Reseller,
    app: &App,
) -> Result<ResellerDashboard> {
    let count = |status: &str| -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM licenses WHERE reseller_id = ?1 AND status = ?2",
            params![&reseller.id, status],
            |row| row.get(0),
        )
        .map_err(Into::into)
    };
    let consumed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM licenses WHERE reseller_id = ?1 AND used_by IS NOT NULL",
        params![&reseller.id],
        |row| row.get(0),
    )?;

    let remaining = if reseller.license_limit == UNLIMITED {
        UNLIMITED
    } else {
        (reseller.license_limit - reseller.used_licenses).max(0)
    };

    Ok(ResellerDashboard {
        app_id: app.app_id.clone(),
        app_name: app.name.clone(),
        license_limit: reseller.license_limit,
        used_licenses: reseller.used_licenses,
        remaining,
        licenses_active: count("active")?,
        licenses_banned: count("banned")?,
        licenses_revoked: count("revoked")?,
        licenses_consumed: consumed,
    })
}

// ============ Payments ============

pub fn create_payment(
    conn: &Connection,
    user_id: &str,
    order_id: &str,
    amount_cents: i64,
    currency: &str,
    plan: Plan,
    coupon: Option<&str>,
) -> Result<Payment> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, user_id, order_id, payment_id, amount_cents, currency,
                               status, plan, coupon, created_at, updated_at)
         VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'created', ?6, ?7, ?8, ?9)",
        params![
            &id,
            user_id,
            order_id,
            amount_cents,
            currency,
            plan.as_ref(),
            coupon,
            now,
            now
        ],
    )?;

    Ok(Payment {
        id,
        user_id: user_id.to_string(),
        order_id: order_id.to_string(),
        payment_id: None,
        amount_cents,
        currency: currency.to_string(),
        status: PaymentStatus::Created,
        plan,
        coupon: coupon.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        params![id],
    )
}

pub fn get_payment_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE order_id = ?1", PAYMENT_COLS),
        params![order_id],
    )
}

/// Atomically claim a payment for capture. Returns false when another
/// request (verify call or webhook replay) already captured it.
pub fn try_capture_payment(conn: &Connection, order_id: &str, payment_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET status = 'captured', payment_id = ?1, updated_at = ?2
         WHERE order_id = ?3 AND status = 'created'",
        params![payment_id, now(), order_id],
    )?;
    Ok(affected > 0)
}

pub fn mark_payment_refunded(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE payments SET status = 'refunded', updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    Ok(())
}

pub fn list_payments_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE user_id = ?1 ORDER BY created_at DESC",
            PAYMENT_COLS
        ),
        params![user_id],
    )
}

pub fn list_refunds_for_payment(conn: &Connection, payment_ref: &str) -> Result<Vec<Refund>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM refunds WHERE payment_ref = ?1 ORDER BY created_at",
            REFUND_COLS
        ),
        params![payment_ref],
    )
}

pub fn create_refund(
    conn: &Connection,
    payment_ref: &str,
    refund_id: &str,
    amount_cents: i64,
) -> Result<Refund> {
    let id = gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO refunds (id, payment_ref, refund_id, amount_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, payment_ref, refund_id, amount_cents, now],
    )?;
    Ok(Refund {
        id,
        payment_ref: payment_ref.to_string(),
        refund_id: refund_id.to_string(),
        amount_cents,
        created_at: now,
    })
}

pub fn payment_analytics(conn: &Connection, user_id: &str) -> Result<PaymentAnalytics> {
    let (total, captured, refunded): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COUNT(CASE WHEN status = 'captured' THEN 1 END),
                COUNT(CASE WHEN status = 'refunded' THEN 1 END)
         FROM payments WHERE user_id = ?1",
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let gross: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payments
         WHERE user_id = ?1 AND status IN ('captured', 'refunded')",
        params![user_id],
        |row| row.get(0),
    )?;
    let refunded_cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(r.amount_cents), 0) FROM refunds r
         JOIN payments p ON p.id = r.payment_ref WHERE p.user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;

    Ok(PaymentAnalytics {
        total_payments: total,
        captured_payments: captured,
        refunded_payments: refunded,
        gross_cents: gross,
        refunded_cents,
    })
}

pub fn get_coupon_by_code(conn: &Connection, code: &str) -> Result<Option<Coupon>> {
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE code = ?1", COUPON_COLS),
        params![code],
    )
}

pub fn create_coupon(
    conn: &Connection,
    code: &str,
    percent_off: i64,
    expires_at: Option<i64>,
) -> Result<Coupon> {
    let id = gen_id();
    conn.execute(
        "INSERT INTO coupons (id, code, percent_off, active, expires_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        params![&id, code, percent_off, expires_at],
    )?;
    Ok(Coupon {
        id,
        code: code.to_string(),
        percent_off,
        active: true,
        expires_at,
    })
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed (replay protection).
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let id = gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

// ============ Audit Logs ============

#[allow(clippy::too_many_arguments)]
pub fn create_audit_log(
    conn: &Connection,
    enabled: bool,
    actor_type: ActorType,
    actor_id: Option<&str>,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let details_str = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO audit_logs (id, timestamp, actor_type, actor_id, action, resource_type,
                                 resource_id, details, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            gen_id(),
            now(),
            actor_type.as_ref(),
            actor_id,
            action,
            resource_type,
            resource_id,
            details_str,
            ip_address,
            user_agent
        ],
    )?;
    Ok(())
}

pub fn list_audit_logs_for_actor(
    conn: &Connection,
    actor_id: &str,
    limit: i64,
) -> Result<Vec<AuditLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM audit_logs WHERE actor_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            AUDIT_LOG_COLS
        ),
        params![actor_id, limit],
    )
}

/// Purge audit logs past the retention window. Called on startup when
/// retention is configured.
pub fn purge_old_audit_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * SECONDS_PER_DAY;
    let deleted = conn.execute(
        "DELETE FROM audit_logs WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
