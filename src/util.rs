//! Shared utility functions for the keymint application.

use axum::http::HeaderMap;
use axum::Json;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::queries;
use crate::error::Result;
use crate::models::ActorType;

pub const SECONDS_PER_DAY: i64 = 86400;

/// Build the standard `{"success": true, "data": ...}` response envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Envelope for responses that only carry a message.
pub fn ok_message(message: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": message }))
}

/// Extract client IP address and user-agent from request headers.
///
/// Tries `x-forwarded-for` first (for proxied requests), then `x-real-ip`,
/// and extracts the `user-agent` header for audit logging.
pub fn extract_request_info(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    (ip, user_agent)
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Record an audit log entry with request context attached.
#[allow(clippy::too_many_arguments)]
pub fn audit_log(
    conn: &Connection,
    enabled: bool,
    actor_type: ActorType,
    actor_id: Option<&str>,
    headers: &HeaderMap,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<&Value>,
) -> Result<()> {
    let (ip, user_agent) = extract_request_info(headers);
    queries::create_audit_log(
        conn,
        enabled,
        actor_type,
        actor_id,
        action,
        resource_type,
        resource_id,
        details,
        ip.as_deref(),
        user_agent.as_deref(),
    )?;
    Ok(())
}
