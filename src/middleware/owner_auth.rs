use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::auth::TokenRole;
use crate::db::{queries, AppState};
use crate::models::User;
use crate::util::extract_bearer_token;

#[derive(Clone)]
pub struct OwnerContext {
    pub user: User,
}

/// Authenticate an app owner from a bearer token.
fn authenticate_owner(state: &AppState, headers: &HeaderMap) -> Result<User, StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;

    let (subject, role) = state
        .tokens
        .verify(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    if role != TokenRole::Owner {
        return Err(StatusCode::FORBIDDEN);
    }

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    queries::get_user_by_id(&conn, &subject)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)
}

pub async fn owner_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = authenticate_owner(&state, request.headers())?;
    request.extensions_mut().insert(OwnerContext { user });
    Ok(next.run(request).await)
}
