use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    middleware,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{hash_password, verify_password};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, OwnerContext};
use crate::models::{
    ActorType, App, Client, ClientLogin, CreateDirectClient, ExtendClient, LicenseStatus,
    RegisterClient, SessionStatus, ValidateSession,
};
use crate::util::{audit_log, ok};

const MIN_USERNAME_LENGTH: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ClientListQuery {
    pub app_id: String,
}

/// NFC-normalize and trim a username so visually identical names collide
/// instead of coexisting.
fn normalize_username(raw: &str) -> String {
    raw.trim().nfc().collect()
}

/// Fetch a client and prove the caller owns its app, or 404.
fn owned_client(
    conn: &rusqlite::Connection,
    client_id: &str,
    ctx: &OwnerContext,
) -> Result<(Client, App)> {
    let client = queries::get_client_by_id(conn, client_id)?
        .ok_or_else(|| AppError::NotFound("Client not found".into()))?;
    let app = queries::get_app_owned(conn, &client.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("Client not found".into()))?;
    Ok((client, app))
}

// ---- Public client endpoints ----

/// Self-registration against a license key. The rejection order is fixed:
/// license not found, app paused, already used, status, expiry - each with
/// the app's configured message - then username validation. The actual
/// consumption is re-checked at commit time inside the registration
/// transaction.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterClient>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;

    let app = queries::get_app(&conn, &input.app_id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let license = queries::get_license_by_key(&conn, &input.key)?
        .filter(|l| l.app_id == app.app_id)
        .ok_or_else(|| AppError::NotFound(app.error_message("license_not_found")))?;

    if app.paused {
        return Err(AppError::Forbidden(app.error_message("app_paused")));
    }
    if license.consumption.is_consumed() {
        return Err(AppError::Forbidden(app.error_message("license_used")));
    }
    match license.status {
        LicenseStatus::Active => {}
        LicenseStatus::Banned => {
            return Err(AppError::Forbidden(app.error_message("license_banned")));
        }
        LicenseStatus::Revoked => {
            return Err(AppError::Forbidden(app.error_message("license_revoked")));
        }
    }
    if license.is_expired(Utc::now().timestamp()) {
        return Err(AppError::Forbidden(app.error_message("license_expired")));
    }

    let username = normalize_username(&input.username);
    if username.len() < MIN_USERNAME_LENGTH {
        return Err(AppError::BadRequest(app.error_message("username_too_short")));
    }
    if queries::get_client_by_username(&conn, &app.app_id, &username)?.is_some() {
        return Err(AppError::Conflict(app.error_message("username_taken")));
    }

    let password_hash = hash_password(&input.password)?;
    let client = queries::register_client_via_license(
        &mut conn,
        &app,
        &license,
        &username,
        &password_hash,
        input.hwid.as_deref(),
    )?;

    tracing::info!(
        "Client registered: {} via license {} (app: {})",
        client.username,
        license.key,
        app.app_id
    );

    Ok(ok(client))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<ClientLogin>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;

    let app = queries::get_app_by_credentials(&conn, &input.app_id, &input.app_secret)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    if app.paused {
        return Err(AppError::Forbidden(app.error_message("app_paused")));
    }

    let username = normalize_username(&input.username);
    let client = queries::get_client_by_username(&conn, &app.app_id, &username)?
        .ok_or_else(|| AppError::Unauthorized(app.error_message("user_not_found")))?;

    if !verify_password(&input.password, &client.password_hash)? {
        return Err(AppError::Unauthorized(app.error_message("invalid_password")));
    }
    if client.banned {
        return Err(AppError::Forbidden(app.error_message("user_banned")));
    }
    if client.is_expired(Utc::now().timestamp()) {
        return Err(AppError::Forbidden(app.error_message("user_expired")));
    }

    if app.settings.hwid_lock {
        match (&client.hwid, &input.hwid) {
            // First login binds the hardware id.
            (None, Some(supplied)) => queries::set_client_hwid(&conn, &client.id, supplied)?,
            (None, None) => {}
            (Some(stored), Some(supplied)) if stored == supplied => {}
            // Mismatch (or missing hwid on a bound account): reject before
            // any login bookkeeping.
            _ => {
                return Err(AppError::Forbidden(app.error_message("hwid_mismatch")));
            }
        }
    } else if let Some(supplied) = &input.hwid {
        // No lock: silently adopt/refresh the latest-seen hardware id.
        queries::set_client_hwid(&conn, &client.id, supplied)?;
    }

    queries::record_client_login(&conn, &client.id)?;
    let client = queries::get_client_by_id(&conn, &client.id)?
        .ok_or_else(|| AppError::Internal("Client vanished during login".into()))?;

    Ok(ok(client))
}

/// Read-only re-validation used by client software between logins.
/// Always 200; failures are reported in the body with the app's message.
pub async fn validate_session(
    State(state): State<AppState>,
    Json(input): Json<ValidateSession>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;

    let app = queries::get_app_by_credentials(&conn, &input.app_id, &input.app_secret)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let invalid = |reason: String| {
        ok(SessionStatus {
            valid: false,
            reason: Some(reason),
        })
    };

    if app.paused {
        return Ok(invalid(app.error_message("app_paused")));
    }

    let username = normalize_username(&input.username);
    let Some(client) = queries::get_client_by_username(&conn, &app.app_id, &username)? else {
        return Ok(invalid(app.error_message("user_not_found")));
    };

    if client.banned {
        return Ok(invalid(app.error_message("user_banned")));
    }
    if client.is_expired(Utc::now().timestamp()) {
        return Ok(invalid(app.error_message("user_expired")));
    }
    if app.settings.hwid_lock {
        if let (Some(stored), Some(supplied)) = (&client.hwid, &input.hwid) {
            if stored != supplied {
                return Ok(invalid(app.error_message("hwid_mismatch")));
            }
        }
    }

    Ok(ok(SessionStatus {
        valid: true,
        reason: None,
    }))
}

// ---- Owner-side client administration ----

pub async fn create_direct(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<CreateDirectClient>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &input.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let username = normalize_username(&input.username);
    if username.len() < MIN_USERNAME_LENGTH {
        return Err(AppError::BadRequest(app.error_message("username_too_short")));
    }
    if input.expires_at <= Utc::now().timestamp() {
        return Err(AppError::BadRequest(
            "expires_at must be in the future".into(),
        ));
    }

    let password_hash = hash_password(&input.password)?;
    let normalized = CreateDirectClient {
        username,
        ..input
    };
    let client = queries::create_direct_client(&conn, &app, &normalized, &password_hash)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "create_direct_client",
        "client",
        &client.id,
        Some(&json!({ "app_id": app.app_id, "username": client.username })),
    )?;

    Ok(ok(client))
}

pub async fn list_clients(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Query(query): Query<ClientListQuery>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &query.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;
    let clients = queries::list_clients_for_app(&conn, &app.app_id)?;
    Ok(ok(clients))
}

pub async fn toggle_ban(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    queries::set_client_banned(&conn, &client.id, !client.banned)?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "toggle_client_ban",
        "client",
        &client.id,
        Some(&json!({ "banned": client.banned })),
    )?;

    Ok(ok(client))
}

pub async fn extend(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<ExtendClient>,
) -> Result<Json<Value>> {
    if input.days <= 0 {
        return Err(AppError::BadRequest("days must be positive".into()));
    }

    let conn = state.db.get()?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    queries::extend_client_expiry(&conn, &client.id, input.days)?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "extend_client",
        "client",
        &client.id,
        Some(&json!({ "days": input.days })),
    )?;

    Ok(ok(client))
}

pub async fn reset_hwid(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    queries::reset_client_hwid(&conn, &client.id)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "reset_client_hwid",
        "client",
        &client.id,
        None,
    )?;

    Ok(ok(json!({ "reset": true })))
}

/// Deleting a client frees its consumed license for reuse.
pub async fn delete_client(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let (client, _) = owned_client(&conn, &client_id, &ctx)?;

    queries::delete_client(&mut conn, &client)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "delete_client",
        "client",
        &client.id,
        Some(&json!({ "username": client.username, "freed_license": client.license_key })),
    )?;

    Ok(ok(json!({ "deleted": true })))
}

pub fn router(state: AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .route("/clients", get(list_clients))
        .route("/clients/create-direct", post(create_direct))
        .route("/clients/{client_id}/toggle-ban", patch(toggle_ban))
        .route("/clients/{client_id}/extend", patch(extend))
        .route("/clients/{client_id}/reset-hwid", patch(reset_hwid))
        .route("/clients/{client_id}", delete(delete_client))
        .layer(middleware::from_fn_with_state(state, owner_auth));

    Router::new()
        .route("/clients/register", post(register))
        .route("/clients/login", post(login))
        .route("/clients/validate-session", post(validate_session))
        .merge(admin_routes)
}
