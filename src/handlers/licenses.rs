use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, OwnerContext};
use crate::models::{
    ActorType, App, BulkDeleteLicenses, CreateLicense, License, LicenseStatus, UpdateLicense,
};
use crate::util::{audit_log, ok};

#[derive(Debug, Deserialize)]
pub struct LicenseListQuery {
    pub app_id: String,
}

/// Fetch a license and prove the caller owns its app, or 404.
fn owned_license(
    conn: &rusqlite::Connection,
    license_id: &str,
    ctx: &OwnerContext,
) -> Result<(License, App)> {
    let license = queries::get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    let app = queries::get_app_owned(conn, &license.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))?;
    Ok((license, app))
}

pub async fn create_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<CreateLicense>,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &input.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let license = queries::create_license_as_owner(&mut conn, &app, &ctx.user, &input)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "create_license",
        "license",
        &license.id,
        Some(&serde_json::json!({
            "key": license.key,
            "app_id": license.app_id,
            "expires_at": license.expires_at,
        })),
    )?;

    tracing::info!("License created: {} (app: {})", license.key, app.app_id);

    Ok(ok(license))
}

pub async fn list_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Query(query): Query<LicenseListQuery>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &query.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;
    let licenses = queries::list_licenses_for_app(&conn, &app.app_id)?;
    Ok(ok(licenses))
}

pub async fn get_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(license_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;
    Ok(ok(license))
}

pub async fn update_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateLicense>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    if let Some(days) = input.extend_days {
        if days <= 0 {
            return Err(AppError::BadRequest("extend_days must be positive".into()));
        }
        queries::extend_license_expiry(&conn, &license.id, days)?;
    }
    if let Some(note) = &input.note {
        queries::update_license_note(&conn, &license.id, note.as_deref())?;
    }

    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "update_license",
        "license",
        &license.id,
        Some(&serde_json::json!({ "extend_days": input.extend_days })),
    )?;

    Ok(ok(license))
}

/// ACTIVE and BANNED toggle into each other; a REVOKED license is terminal
/// and any toggle attempt is rejected rather than silently resurrecting it.
pub async fn toggle_ban(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

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

    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "toggle_license_ban",
        "license",
        &license.id,
        Some(&serde_json::json!({ "status": license.status })),
    )?;

    Ok(ok(license))
}

pub async fn revoke_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    if license.status == LicenseStatus::Revoked {
        return Err(AppError::Conflict("License is already revoked".into()));
    }

    queries::revoke_license(&conn, &license.id)?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "revoke_license",
        "license",
        &license.id,
        Some(&serde_json::json!({ "key": license.key })),
    )?;

    Ok(ok(license))
}

pub async fn delete_license(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(license_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let (license, _) = owned_license(&conn, &license_id, &ctx)?;

    queries::delete_license(&mut conn, &license)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "delete_license",
        "license",
        &license.id,
        Some(&serde_json::json!({ "key": license.key })),
    )?;

    Ok(ok(serde_json::json!({ "deleted": true })))
}

/// Bulk delete: removes the app's owner-created licenses only. Reseller
/// stock is untouched (and so are their usage counters).
pub async fn bulk_delete_licenses(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<BulkDeleteLicenses>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = queries::get_app_owned(&conn, &input.app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))?;

    let deleted = queries::bulk_delete_owner_licenses(&conn, &app.app_id)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "bulk_delete_licenses",
        "app",
        &app.app_id,
        Some(&serde_json::json!({ "deleted": deleted })),
    )?;

    tracing::info!("Bulk deleted {} license(s) from app {}", deleted, app.app_id);

    Ok(ok(serde_json::json!({ "deleted": deleted })))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/licenses", post(create_license))
        .route("/licenses", get(list_licenses))
        .route("/licenses", delete(bulk_delete_licenses))
        .route("/licenses/{license_id}", get(get_license))
        .route("/licenses/{license_id}", put(update_license))
        .route("/licenses/{license_id}", delete(delete_license))
        .route("/licenses/{license_id}/toggle-ban", patch(toggle_ban))
        .route("/licenses/{license_id}/revoke", post(revoke_license))
        .layer(middleware::from_fn_with_state(state, owner_auth))
}
