use std::collections::BTreeMap;

use axum::{
    extract::{Extension, Path, State},
    http::HeaderMap,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::Value;

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, OwnerContext};
use crate::models::{is_known_error_message_key, ActorType, App, CreateApp, UpdateApp, UpdateErrorMessages};
use crate::util::{audit_log, ok};

/// Resolve an app for the authenticated owner, or 404. A foreign app looks
/// identical to a missing one.
fn owned_app(
    conn: &rusqlite::Connection,
    app_id: &str,
    ctx: &OwnerContext,
) -> Result<App> {
    queries::get_app_owned(conn, app_id, &ctx.user.id)?
        .ok_or_else(|| AppError::NotFound("App not found".into()))
}

pub async fn create_app(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    headers: HeaderMap,
    Json(input): Json<CreateApp>,
) -> Result<Json<Value>> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("App name is required".into()));
    }

    let mut conn = state.db.get()?;
    let app = queries::create_app(&mut conn, &ctx.user, &input)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "create_app",
        "app",
        &app.app_id,
        Some(&serde_json::json!({ "name": app.name })),
    )?;

    tracing::info!("App created: {} (owner: {})", app.app_id, ctx.user.id);

    Ok(ok(app))
}

pub async fn list_apps(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let apps = queries::list_apps_for_owner(&conn, &ctx.user.id)?;
    Ok(ok(apps))
}

pub async fn get_app(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = owned_app(&conn, &app_id, &ctx)?;
    Ok(ok(app))
}

pub async fn update_app(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateApp>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    owned_app(&conn, &app_id, &ctx)?;

    queries::update_app(&conn, &app_id, &input)?;
    let app = owned_app(&conn, &app_id, &ctx)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "update_app",
        "app",
        &app_id,
        None,
    )?;

    Ok(ok(app))
}

pub async fn delete_app(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let mut conn = state.db.get()?;
    let app = owned_app(&conn, &app_id, &ctx)?;

    // Cascades to licenses, clients, and resellers.
    queries::delete_app_cascade(&mut conn, &app.app_id)?;

    audit_log(
        &conn,
        state.audit_log_enabled,
        ActorType::Owner,
        Some(&ctx.user.id),
        &headers,
        "delete_app",
        "app",
        &app_id,
        Some(&serde_json::json!({ "name": app.name })),
    )?;

    tracing::info!("App deleted: {} (owner: {})", app_id, ctx.user.id);

    Ok(ok(serde_json::json!({ "deleted": true })))
}

pub async fn get_error_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = owned_app(&conn, &app_id, &ctx)?;
    Ok(ok(app.effective_error_messages()))
}

/// Partial update of the message map. Unknown keys are rejected; an empty
/// string resets that key to its default.
pub async fn update_error_messages(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
    Json(input): Json<UpdateErrorMessages>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = owned_app(&conn, &app_id, &ctx)?;

    for key in input.messages.keys() {
        if !is_known_error_message_key(key) {
            return Err(AppError::BadRequest(format!(
                "Unknown error message key: {}",
                key
            )));
        }
    }

    let mut overrides: BTreeMap<String, String> = app.error_message_overrides.clone();
    for (key, value) in input.messages {
        if value.is_empty() {
            overrides.remove(&key);
        } else {
            overrides.insert(key, value);
        }
    }

    queries::set_error_message_overrides(&conn, &app_id, &overrides)?;
    let app = owned_app(&conn, &app_id, &ctx)?;
    Ok(ok(app.effective_error_messages()))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
    Path(app_id): Path<String>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app = owned_app(&conn, &app_id, &ctx)?;
    let stats = queries::app_stats(&conn, &app.app_id)?;
    Ok(ok(stats))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/apps", post(create_app))
        .route("/apps", get(list_apps))
        .route("/apps/{app_id}", get(get_app))
        .route("/apps/{app_id}", put(update_app))
        .route("/apps/{app_id}", delete(delete_app))
        .route("/apps/{app_id}/error-messages", get(get_error_messages))
        .route("/apps/{app_id}/error-messages", put(update_error_messages))
        .route("/apps/{app_id}/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state, owner_auth))
}
