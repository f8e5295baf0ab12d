use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tiers, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    /// Wire code used inside access tokens. Zero is reserved.
    pub fn code(self) -> u8 {
        match self {
            Tier::Free => 1,
            Tier::Basic => 2,
            Tier::Premium => 3,
            Tier::Enterprise => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Tier::Free),
            2 => Some(Tier::Basic),
            3 => Some(Tier::Premium),
            4 => Some(Tier::Enterprise),
            _ => None,
        }
    }

    pub fn satisfies(self, required: Tier) -> bool {
        self >= required
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subject_id: Option<String>,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub max_uploads: u32,
    pub uploads_used: u32,
    pub max_clients: u32,
    pub clients_used: u32,
    /// Bytes
    pub max_file_size: u64,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Fixed entitlement for anonymous requests. No quotas.
    pub fn public() -> Self {
        Self {
            subject_id: None,
            tier: Tier::Free,
            status: SubscriptionStatus::Active,
            max_uploads: 0,
            uploads_used: 0,
            max_clients: 0,
            clients_used: 0,
            max_file_size: 0,
            expiry_date: None,
        }
    }

    /// Policy default for an authenticated subject with no stored record
    pub fn free_default(subject_id: &str) -> Self {
        Self {
            subject_id: Some(subject_id.to_string()),
            tier: Tier::Free,
            status: SubscriptionStatus::Active,
            max_uploads: 5,
            uploads_used: 0,
            max_clients: 1,
            clients_used: 0,
            max_file_size: 100 * 1024 * 1024,
            expiry_date: None,
        }
    }

    /// Tier that actually applies at `now`. Anything not active and
    /// unexpired falls back to free.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        let lapsed = self.expiry_date.is_some_and(|expiry| expiry <= now);
        if self.status != SubscriptionStatus::Active || lapsed {
            Tier::Free
        } else {
            self.tier
        }
    }

    pub fn uploads_remaining(&self) -> u32 {
        self.max_uploads.saturating_sub(self.uploads_used)
    }

    pub fn clients_remaining(&self) -> u32 {
        self.max_clients.saturating_sub(self.clients_used)
    }
}

/// Where the tier used for an access decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    Snapshot,
    Live,
    Public,
    DefaultFree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub subject_id: Option<String>,
    pub tier: Tier,
    pub source: EntitlementSource,
}
