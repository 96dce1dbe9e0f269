use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::scopes::{is_known_scope, ScopePolicy};
use super::store::ApiKeyStore;
use crate::domain::api_key::{ApiKey, ApiKeyMetadata, KeyId, UsageCounters};
use crate::errors::StoreError;

pub const KEY_ID_PREFIX: &str = "kid_";
pub const SECRET_PREFIX: &str = "bwk_";

const KEY_ID_BYTES: usize = 16;
const SECRET_BYTES: usize = 32;
const MAX_EXPIRY_DAYS: u32 = 3650;

#[derive(Debug, Error)]
pub enum ApiKeyError {
    #[error("invalid key request: {0}")]
    InvalidRequest(String),
    #[error("granting scope `{0}` requires a broader key")]
    ScopeNotGrantable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Default)]
pub struct NewApiKey {
    pub name: String,
    pub scopes: Vec<String>,
    pub quota_per_hour: Option<u32>,
    pub expires_in_days: Option<u32>,
}

/// Result of key creation. `secret` is only ever available here.
#[derive(Debug)]
pub struct CreatedApiKey {
    pub key_id: KeyId,
    pub secret: SecretString,
    pub metadata: ApiKeyMetadata,
}

pub struct ApiKeyManager {
    store: Arc<dyn ApiKeyStore>,
    scope_policy: ScopePolicy,
    default_quota_per_hour: u32,
}

impl ApiKeyManager {
    pub fn new(
        store: Arc<dyn ApiKeyStore>,
        scope_policy: ScopePolicy,
        default_quota_per_hour: u32,
    ) -> Self {
        Self { store, scope_policy, default_quota_per_hour }
    }

    pub fn scope_policy(&self) -> ScopePolicy {
        self.scope_policy
    }

    /// Fresh `(key_id, secret)` pair from the OS random source.
    pub fn generate() -> (KeyId, SecretString) {
        let key_id = format!("{KEY_ID_PREFIX}{}", url_safe_token(KEY_ID_BYTES));
        let secret = format!("{SECRET_PREFIX}{}", url_safe_token(SECRET_BYTES));
        (KeyId(key_id), SecretString::from(secret))
    }

    pub fn hash(secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }

    pub async fn create(&self, request: NewApiKey) -> Result<CreatedApiKey, ApiKeyError> {
        self.create_at(request, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        request: NewApiKey,
        now: DateTime<Utc>,
    ) -> Result<CreatedApiKey, ApiKeyError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ApiKeyError::InvalidRequest("name must not be empty".to_string()));
        }

        let quota_per_hour = request.quota_per_hour.unwrap_or(self.default_quota_per_hour);
        if quota_per_hour == 0 {
            return Err(ApiKeyError::InvalidRequest(
                "quota_per_hour must be greater than zero".to_string(),
            ));
        }

        let scopes = normalize_scopes(request.scopes)?;
        let expires_at = match request.expires_in_days {
            Some(days) if days == 0 || days > MAX_EXPIRY_DAYS => {
                return Err(ApiKeyError::InvalidRequest(format!(
                    "expires_in_days must be in range 1..={MAX_EXPIRY_DAYS}"
                )))
            }
            Some(days) => Some(now + Duration::days(i64::from(days))),
            None => None,
        };

        let (key_id, secret) = Self::generate();
        let key = ApiKey {
            key_id: key_id.clone(),
            key_hash: Self::hash(secret.expose_secret()),
            name,
            scopes,
            quota_per_hour,
            active: true,
            created_at: now,
            expires_at,
            last_used_at: None,
            usage: UsageCounters::new(now),
        };
        let metadata = key.metadata();
        self.store.insert(key).await?;

        info!(
            event_name = "auth.key.created",
            key_id = %key_id,
            quota_per_hour,
            scope_count = metadata.scopes.len(),
            "api key created"
        );

        Ok(CreatedApiKey { key_id, secret, metadata })
    }

    /// Creates a key on behalf of `grantor`, which must already hold every requested scope.
    pub async fn create_for(
        &self,
        grantor: &ApiKey,
        request: NewApiKey,
    ) -> Result<CreatedApiKey, ApiKeyError> {
        let requested = normalize_scopes(request.scopes.clone())?;
        if let Err(scope) = self.scope_policy.check_grant(grantor, &requested) {
            info!(
                event_name = "auth.key.grant_denied",
                key_id = %grantor.key_id,
                scope = %scope,
                "key attempted to grant a scope it does not hold"
            );
            return Err(ApiKeyError::ScopeNotGrantable(scope));
        }
        self.create(request).await
    }

    pub async fn validate(&self, secret: &str) -> Result<Option<ApiKey>, StoreError> {
        self.validate_at(secret, Utc::now()).await
    }

    /// Resolves a bearer secret to its active key and records one request of usage.
    pub async fn validate_at(
        &self,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        if !secret.starts_with(SECRET_PREFIX) {
            debug!(event_name = "auth.key.malformed", "bearer credential has unexpected shape");
            return Ok(None);
        }

        let digest = Self::hash(secret);
        let Some(key) = self.store.find_by_hash(&digest).await? else {
            debug!(event_name = "auth.key.unknown", "no key matches credential");
            return Ok(None);
        };

        if !key.active {
            debug!(event_name = "auth.key.inactive", key_id = %key.key_id, "key is revoked");
            return Ok(None);
        }
        if key.is_expired(now) {
            debug!(event_name = "auth.key.expired", key_id = %key.key_id, "key has expired");
            return Ok(None);
        }

        // A revoke may land between the read above and the usage update.
        let recorded = self.store.record_usage(&key.key_id, now).await?;
        Ok(recorded.filter(|key| {
            let usable = key.is_usable(now);
            if !usable {
                debug!(
                    event_name = "auth.key.revoked_in_flight",
                    key_id = %key.key_id,
                    "key revoked during validation"
                );
            }
            usable
        }))
    }

    pub fn check_scope(&self, key: &ApiKey, required: &str) -> bool {
        self.scope_policy.allows(key, required)
    }

    pub async fn revoke(&self, key_id: &KeyId) -> Result<bool, StoreError> {
        let existed = self.store.deactivate(key_id).await?;
        if existed {
            info!(event_name = "auth.key.revoked", key_id = %key_id, "api key revoked");
        }
        Ok(existed)
    }

    pub async fn get(&self, key_id: &KeyId) -> Result<Option<ApiKeyMetadata>, StoreError> {
        Ok(self.store.find_by_key_id(key_id).await?.map(|key| key.metadata()))
    }

    pub async fn list(&self) -> Result<Vec<ApiKeyMetadata>, StoreError> {
        Ok(self.store.list().await?.iter().map(ApiKey::metadata).collect())
    }
}

fn url_safe_token(bytes: usize) -> String {
    let mut buffer = vec![0_u8; bytes];
    OsRng.fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

fn normalize_scopes(scopes: Vec<String>) -> Result<BTreeSet<String>, ApiKeyError> {
    let mut normalized = BTreeSet::new();
    for scope in scopes {
        let scope = scope.trim().to_string();
        if scope.is_empty() {
            continue;
        }
        if !is_known_scope(&scope) {
            return Err(ApiKeyError::InvalidRequest(format!("unknown scope `{scope}`")));
        }
        normalized.insert(scope);
    }
    Ok(normalized)
}
