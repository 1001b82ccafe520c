pub mod apps;
pub mod auth;
pub mod clients;
pub mod licenses;
pub mod payments;
pub mod resellers;

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router(state.clone()))
        .merge(apps::router(state.clone()))
        .merge(licenses::router(state.clone()))
        .merge(resellers::router(state.clone()))
        .merge(clients::router(state.clone()))
        .merge(payments::router(state))
}
