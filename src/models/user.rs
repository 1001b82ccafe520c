use serde::{Deserialize, Serialize};

use crate::entitlements::{Plan, PlanLimits};

/// An application owner account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub plan: Plan,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    pub email: String,
    pub password: String,
}

/// Profile view with the plan's derived limits attached.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub plan: Plan,
    pub limits: PlanLimits,
    pub app_count: i64,
    pub created_at: i64,
}

impl UserProfile {
    pub fn from_user(user: User, app_count: i64) -> Self {
        Self {
            limits: user.plan.limits(),
            id: user.id,
            email: user.email,
            name: user.name,
            plan: user.plan,
            app_count,
            created_at: user.created_at,
        }
    }
}
