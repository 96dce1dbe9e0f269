use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::api_key::{ApiKey, KeyId};
use crate::errors::StoreError;

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Persists a new key. Fails with `StoreError::Conflict` if the key_id or digest exists.
    async fn insert(&self, key: ApiKey) -> Result<(), StoreError>;

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn find_by_key_id(&self, key_id: &KeyId) -> Result<Option<ApiKey>, StoreError>;

    /// Atomically counts one request against the key and returns the updated record.
    /// Returns `None` without counting when the key is missing, revoked or expired.
    async fn record_usage(
        &self,
        key_id: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError>;

    /// Marks the key inactive. Returns false only when the key does not exist.
    async fn deactivate(&self, key_id: &KeyId) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<ApiKey>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryApiKeyStore {
    keys: RwLock<HashMap<KeyId, ApiKey>>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn insert(&self, key: ApiKey) -> Result<(), StoreError> {
        let mut keys = self.keys.write().await;
        if keys.contains_key(&key.key_id) {
            return Err(StoreError::Conflict(format!("key_id `{}` already exists", key.key_id)));
        }
        if keys.values().any(|existing| existing.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("key digest already exists".to_string()));
        }
        keys.insert(key.key_id.clone(), key);
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.read().await.values().find(|key| key.key_hash == key_hash).cloned())
    }

    async fn find_by_key_id(&self, key_id: &KeyId) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn record_usage(
        &self,
        key_id: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        let mut keys = self.keys.write().await;
        let Some(key) = keys.get_mut(key_id).filter(|key| key.is_usable(now)) else {
            return Ok(None);
        };
        key.usage.record(now);
        key.last_used_at = Some(now);
        Ok(Some(key.clone()))
    }

    async fn deactivate(&self, key_id: &KeyId) -> Result<bool, StoreError> {
        let mut keys = self.keys.write().await;
        match keys.get_mut(key_id) {
            Some(key) => {
                key.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<ApiKey>, StoreError> {
        let mut keys: Vec<ApiKey> = self.keys.read().await.values().cloned().collect();
        keys.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.key_id.cmp(&right.key_id))
        });
        Ok(keys)
    }
}
