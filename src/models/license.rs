use serde::{Deserialize, Serialize, Serializer};
use strum::{AsRefStr, EnumString};

/// Stored license status. Expiry is a derived, read-time property
/// (`now > expires_at`) and can co-occur with any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Revoked,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CreatorType {
    Owner,
    Reseller,
}

/// Whether the license has been redeemed, and by which client.
/// A consumed license always knows its consumer - the used/used_by pair
/// cannot go out of sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    Unconsumed,
    ConsumedBy(String),
}

impl Consumption {
    pub fn from_used_by(used_by: Option<String>) -> Self {
        match used_by {
            Some(client_id) => Consumption::ConsumedBy(client_id),
            None => Consumption::Unconsumed,
        }
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self, Consumption::ConsumedBy(_))
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            Consumption::ConsumedBy(id) => Some(id),
            Consumption::Unconsumed => None,
        }
    }
}

// Serialized as the API's `used`/`used_by` pair.
impl Serialize for Consumption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            used: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            used_by: Option<&'a str>,
        }
        Repr {
            used: self.is_consumed(),
            used_by: self.client_id(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    pub id: String,
    pub app_id: String,
    pub key: String,
    pub created_by_user: String,
    pub created_by_type: CreatorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reseller_id: Option<String>,
    #[serde(flatten)]
    pub consumption: Consumption,
    pub status: LicenseStatus,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: i64,
}

impl License {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLicense {
    pub app_id: String,
    /// Unix timestamp; must be strictly in the future.
    pub expires_at: i64,
    #[serde(default)]
    pub note: Option<String>,
    /// Custom key; only honored when the app allows it.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLicense {
    /// None = leave unchanged, Some(None) = clear, Some(Some(v)) = set
    pub note: Option<Option<String>>,
    /// Added to the current expiry (not to now), so extensions stack even
    /// after the key has lapsed.
    pub extend_days: Option<i64>,
}

/// DELETE /licenses body: bulk removal of owner-created licenses.
#[derive(Debug, Deserialize)]
pub struct BulkDeleteLicenses {
    pub app_id: String,
}
