//! Plan tiers and the quota limits they derive.
//!
//! Limits are a pure function of the plan - they are never stored, so a
//! user's plan and limits cannot drift apart. The sentinel `-1` means
//! unlimited.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

pub const UNLIMITED: i64 = -1;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

/// Effective quota limits for a plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub max_apps: i64,
    pub max_resellers: i64,
    pub max_licenses_per_app: i64,
}

impl Plan {
    pub fn limits(self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                max_apps: 2,
                max_resellers: 0,
                max_licenses_per_app: 30,
            },
            Plan::Premium => PlanLimits {
                max_apps: UNLIMITED,
                max_resellers: UNLIMITED,
                max_licenses_per_app: UNLIMITED,
            },
        }
    }

    pub fn can_create_app(self, current_apps: i64) -> bool {
        within_limit(self.limits().max_apps, current_apps)
    }

    /// Free-plan owners can never create resellers (max_resellers = 0).
    pub fn can_create_reseller(self, current_resellers: i64) -> bool {
        within_limit(self.limits().max_resellers, current_resellers)
    }

    pub fn can_create_license(self, current_licenses_in_app: i64) -> bool {
        within_limit(self.limits().max_licenses_per_app, current_licenses_in_app)
    }
}

fn within_limit(limit: i64, current: i64) -> bool {
    limit == UNLIMITED || current < limit
}
