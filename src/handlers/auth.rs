use axum::{
    extract::{Extension, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::auth::TokenRole;
use crate::crypto::{hash_password, verify_password};
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::middleware::{owner_auth, OwnerContext};
use crate::models::{LoginUser, RegisterUser, UserProfile};
use crate::util::ok;

const MIN_PASSWORD_LENGTH: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterUser>,
) -> Result<Json<Value>> {
    let email = input.email.trim().to_lowercase();
    if !email.contains('@') || email.len() < 3 {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    if input.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let password_hash = hash_password(&input.password)?;
    let conn = state.db.get()?;
    let user = queries::create_user(&conn, &email, input.name.as_deref(), &password_hash)?;
    let token = state.tokens.issue(&user.id, TokenRole::Owner)?;

    tracing::info!("Owner registered: {}", user.id);

    Ok(ok(json!({ "user": user, "token": token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginUser>,
) -> Result<Json<Value>> {
    let email = input.email.trim().to_lowercase();
    let conn = state.db.get()?;

    // Same error for unknown email and wrong password.
    let user = queries::get_user_by_email(&conn, &email)?
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".into()))?;

    if !verify_password(&input.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }

    let token = state.tokens.issue(&user.id, TokenRole::Owner)?;
    Ok(ok(json!({ "user": user, "token": token })))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let app_count = queries::count_apps_for_owner(&conn, &ctx.user.id)?;
    Ok(ok(UserProfile::from_user(ctx.user, app_count)))
}

const AUDIT_LOG_PAGE: i64 = 100;

/// The owner's own recent audit trail, newest first.
pub async fn audit_logs(
    State(state): State<AppState>,
    Extension(ctx): Extension<OwnerContext>,
) -> Result<Json<Value>> {
    let conn = state.db.get()?;
    let logs = queries::list_audit_logs_for_actor(&conn, &ctx.user.id, AUDIT_LOG_PAGE)?;
    Ok(ok(logs))
}

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/auth/profile", get(profile))
        .route("/auth/audit-logs", get(audit_logs))
        .layer(middleware::from_fn_with_state(state, owner_auth));

    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .merge(protected)
}
