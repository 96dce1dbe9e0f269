use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Public identifier of an API key. Not a credential.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(pub String);

impl KeyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total_requests: u64,
    pub current_hour_requests: u32,
    pub last_hour_reset: DateTime<Utc>,
}

impl UsageCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { total_requests: 0, current_hour_requests: 0, last_hour_reset: now }
    }

    /// Counts one request, starting a fresh hour when the previous one has elapsed.
    pub fn record(&mut self, now: DateTime<Utc>) {
        if self.last_hour_reset < now - Duration::hours(1) {
            self.current_hour_requests = 0;
            self.last_hour_reset = now;
        }
        self.current_hour_requests = self.current_hour_requests.saturating_add(1);
        self.total_requests = self.total_requests.saturating_add(1);
    }
}

/// Stored API key record. Holds the secret digest, never the secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiKey {
    pub key_id: KeyId,
    pub key_hash: String,
    pub name: String,
    pub scopes: BTreeSet<String>,
    pub quota_per_hour: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage: UsageCounters,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires_at| expires_at <= now).unwrap_or(false)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    pub fn metadata(&self) -> ApiKeyMetadata {
        ApiKeyMetadata {
            key_id: self.key_id.clone(),
            name: self.name.clone(),
            scopes: self.scopes.iter().cloned().collect(),
            quota_per_hour: self.quota_per_hour,
            active: self.active,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            total_requests: self.usage.total_requests,
            current_hour_requests: self.usage.current_hour_requests,
        }
    }
}

/// Externally visible view of a key: no digest, no secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyMetadata {
    pub key_id: KeyId,
    pub name: String,
    pub scopes: Vec<String>,
    pub quota_per_hour: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub current_hour_requests: u32,
}
