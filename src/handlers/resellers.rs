use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::TokenRole;
use crate::crypto::{hash_password, verify_password};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, reseller_auth, OwnerContext, ResellerContext};
use crate::models::{
    ActorType, App, CreateReseller, License, LicenseStatus, Reseller, ResellerAction,
    ResellerBulkCreateLicenses, ResellerLogin, UpdateReseller,
};
use crate::util::{audit_log, ok};

const MIN_USERNAME_LENGTH: usize = 3;
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct ResellerListQuery {
    pub app_id: String,
}

/// Fetch a reseller and prove the caller owns its app, or 404.
fn owned_reseller(
    conn: &rusqlite::Connection,
    reseller_id: &str,
    ctx: &OwnerContext,
) -> Result<(Reseller, App)> {
    let reseller = queries::get_reseller_by_id(conn, reseller_id)?
        .ok_or_else(|| AppError::NotFound("Reseller not found".into()))?;
    let app = queries::get_app_owned(conn, &reseller.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("Reseller not found".into()))?;
    Ok((reseller, app))
}

// ---- Owner-side management ----

pub async fn create_reseller(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<CreateReseller>,
) -> Result<Json<Value>> {
    if input.username.trim().len() < MIN_USERNAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Username must be at least {} characters",
            MIN_USERNAME_LENGTH
        )));
    }
    if input.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let mut conn = state.db.get()?;
    queries::get_app_owned(&conn, &input.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let password_hash = hash_password(&input.password)?;
    let reseller = queries::create_reseller(&mut conn, &ctx.user, &input, &password_hash)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "create_reseller",
        "reseller",
        &reseller.id,
        Some(&json!({ "app_id": reseller.app_id, "username": reseller.username })),
    )?;

    tracing::info!(
        "Reseller created: {} (app: {})",
        reseller.username,
        reseller.app_id
    );

    Ok(ok(reseller))
}

pub async fn list_resellers(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Query(query): Query<ResellerListQuery>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &query.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;
    let resellers = queries::list_resellers_for_app(&conn, &app.app_id)?;
    Ok(ok(resellers))
}

pub async fn get_reseller(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(reseller_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (reseller, _) = owned_reseller(&conn, &reseller_id, &ctx)?;
    Ok(ok(reseller))
}

pub async fn update_reseller(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(reseller_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateReseller>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    owned_reseller(&conn, &reseller_id, &ctx)?;

    let new_password_hash = match &input.password {
        Some(password) => {
            if password.len() < MIN_PASSWORD_LENGTH {
                return Err(AppError::BadRequest(format!(
                    "Password must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }
            Some(hash_password(password)?)
        }
        None => None,
    };

    queries::update_reseller(&conn, &reseller_id, &input, new_password_hash.as_deref())?;
    let (reseller, _) = owned_reseller(&conn, &reseller_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "update_reseller",
        "reseller",
        &reseller.id,
        None,
    )?;

    Ok(ok(reseller))
}

pub async fn delete_reseller(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(reseller_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let (reseller, _) = owned_reseller(&conn, &reseller_id, &ctx)?;

    // Blocked while the reseller still has ACTIVE licenses.
    queries::delete_reseller(&mut conn, &reseller.id)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "delete_reseller",
        "reseller",
        &reseller.id,
        Some(&json!({ "username": reseller.username })),
    )?;

    Ok(ok(json!({ "deleted": true })))
}

// ---- Reseller console ----

pub async fn reseller_login(
    State(state): State<AppState>,
    Json(input): Json<ResellerLogin>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;

    let reseller = queries::get_reseller_by_login(&conn, &input.app_id, &input.username)?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".into()))?;

    if !verify_password(&input.password, &reseller.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }
    if !reseller.active {
        return Err(AppError::Forbidden("Reseller account is inactive".into()));
    }

    let token = state.tokens.issue(&reseller.id, TokenRole::Reseller)?;
    Ok(ok(json!({ "reseller": reseller, "token": token })))
}

pub async fn reseller_profile(
    Extension(ctx): Extension<ResellerContext>,
) -> Result<Json<Value>> {
    Ok(ok(ctx.reseller))
}

pub async fn reseller_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<ResellerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let licenses = queries::list_licenses_for_reseller(&conn, &ctx.reseller.id)?;
    Ok(ok(licenses))
}

/// Bulk creation against the reseller's own quota, on top of the owner's
/// app-level quota.
pub async fn reseller_create_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<ResellerContext>,
    headers: HeaderMap,
    Json(input): Json<ResellerBulkCreateLicenses>,
) -> Result<Json<Value>> {
    if !ctx.reseller.has_permission(ResellerAction::Create) {
        return Err(AppError::Forbidden(
            ctx.app.error_message("reseller_not_permitted"),
        ));
    }

    let mut conn = state.db.get()?;
    let owner = queries::get_user_by_id(&conn, &ctx.app.owner_id)?
        .ok_or_else(|| AppError::Internal("App owner not found".into()))?;

    let licenses = queries::create_licenses_as_reseller(
        &mut conn,
        &ctx.app,
        owner.plan,
        &ctx.reseller,
        input.expires_at,
        input.note.as_deref(),
        input.count,
    )?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Reseller,
        Some(&ctx.reseller.id),
        &headers,
        "create_licenses",
        "app",
        &ctx.app.app_id,
        Some(&json!({ "count": licenses.len() })),
    )?;

    tracing::info!(
        "Reseller {} created {} license(s) in app {}",
        ctx.reseller.username,
        licenses.len(),
        ctx.app.app_id
    );

    Ok(ok(licenses))
}

/// Resolve a license within the reseller's assigned app, or 404. The
/// console works on any license in the assigned app, gated per-flag.
fn app_license(
    conn: &rusqlite::Connection,
    license_id: &str,
    ctx: &ResellerContext,
) -> Result<License> {
    queries::get_license_by_id(conn, license_id)?
        .filter(|l| l.app_id == ctx.app.app_id)
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

pub async fn reseller_toggle_ban(
    State(state): State<AppState>,
    Extension(ctx): Extension<ResellerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    if !ctx.reseller.has_permission(ResellerAction::BanUnban) {
        return Err(AppError::Forbidden(
            ctx.app.error_message("reseller_not_permitted"),
        ));
    }

    let conn = state.db.get()?;
    let license = app_license(&conn, &license_id, &ctx)?;

    let (from, to) = match license.status {
        LicenseStatus::Active => (LicenseStatus::Active, LicenseStatus::Banned),
        LicenseStatus::Banned => (LicenseStatus::Banned, LicenseStatus::Active),
        LicenseStatus::Revoked => {
            return Err(AppError::Conflict("License is revoked".into()));
        }
    };
    if !queries::swap_license_status(&conn, &license.id, from, to)? {
        return Err(AppError::Conflict(
            "License status changed concurrently".into(),
        ));
    }

    let license = app_license(&conn, &license_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Reseller,
        Some(&ctx.reseller.id),
        &headers,
        "toggle_license_ban",
        "license",
        &license.id,
        Some(&json!({ "status": license.status })),
    )?;

    Ok(ok(license))
}

#[derive(Debug, Deserialize)]
pub struct ResellerExtendLicense {
    pub extend_days: i64,
}

pub async fn reseller_extend_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<ResellerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<ResellerExtendLicense>,
) -> Result<Json<Value>> {
    if !ctx.reseller.has_permission(ResellerAction::EditExpiry) {
        return Err(AppError::Forbidden(
            ctx.app.error_message("reseller_not_permitted"),
        ));
    }
    if input.extend_days <= 0 {
        return Err(AppError::BadRequest("extend_days must be positive".into()));
    }

    let conn = state.db.get()?;
    let license = app_license(&conn, &license_id, &ctx)?;
    queries::extend_license_expiry(&conn, &license.id, input.extend_days)?;
    let license = app_license(&conn, &license_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Reseller,
        Some(&ctx.reseller.id),
        &headers,
        "extend_license",
        "license",
        &license.id,
        Some(&json!({ "extend_days": input.extend_days })),
    )?;

    Ok(ok(license))
}

pub async fn reseller_dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<ResellerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let dashboard = queries::reseller_dashboard(&conn, &ctx.reseller, &ctx.app)?;
    Ok(ok(dashboard))
}

pub fn router(state: AppState) -> Router<AppState> {
    let owner_routes = Router::new()
        .route("/resellers", post(create_reseller))
        .route("/resellers", get(list_resellers))
        .route("/resellers/{reseller_id}", get(get_reseller))
        .route("/resellers/{reseller_id}", put(update_reseller))
        .route("/resellers/{reseller_id}", delete(delete_reseller))
        .layer(middleware::from_fn_with_state(state.clone(), owner_auth));

    let console_routes = Router::new()
        .route("/resellers/auth/profile", get(reseller_profile))
        .route("/resellers/auth/licenses", get(reseller_licenses))
        .route("/resellers/auth/licenses", post(reseller_create_licenses))
        .route(
            "/resellers/auth/licenses/{license_id}/toggle-ban",
            patch(reseller_toggle_ban),
        )
        .route(
            "/resellers/auth/licenses/{license_id}/extend",
            patch(reseller_extend_license),
        )
        .route("/resellers/dashboard/data", get(reseller_dashboard))
        .layer(middleware::from_fn_with_state(state, reseller_auth));

    Router::new()
        .route("/resellers/auth/login", post(reseller_login))
        .merge(owner_routes)
        .merge(console_routes)
}
