use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::auth::TokenRole;
use crate::db::{queries, AppState};
use crate::models::{App, Reseller};
use crate::util::extract_bearer_token;

#[derive(Clone)]
pub struct ResellerContext {
    pub reseller: Reseller,
    /// The one app this reseller is scoped to.
    pub app: App,
}

fn authenticate_reseller(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Reseller, App), StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;

    let (subject, role) = state
        .tokens
        .verify(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    if role != TokenRole::Reseller {
        return Err(StatusCode::FORBIDDEN);
    }

    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let reseller = queries::get_reseller_by_id(&conn, &subject)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // A deactivated reseller keeps a valid token but loses all access.
    if !reseller.active {
        return Err(StatusCode::FORBIDDEN);
    }

    let app = queries::get_app(&conn, &reseller.app_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok((reseller, app))
}

pub async fn reseller_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (reseller, app) = authenticate_reseller(&state, request.headers())?;
    request
        .extensions_mut()
        .insert(ResellerContext { reseller, app });
    Ok(next.run(request).await)
}
