use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::Row;

use bridgeway_core::auth::ApiKeyStore;
use bridgeway_core::domain::api_key::{ApiKey, KeyId, UsageCounters};
use bridgeway_core::errors::StoreError;

use super::{decode_err, RepositoryError};
use crate::DbPool;

const KEY_COLUMNS: &str = "key_id, key_hash, name, scopes, quota_per_hour, active, created_at,
     expires_at, last_used_at, total_requests, current_hour_requests, last_hour_reset";

pub struct SqlApiKeyRepository {
    pool: DbPool,
}

impl SqlApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(decode_err)
}

fn row_to_api_key(row: &sqlx::sqlite::SqliteRow) -> Result<ApiKey, RepositoryError> {
    let key_id: String = row.try_get("key_id").map_err(decode_err)?;
    let key_hash: String = row.try_get("key_hash").map_err(decode_err)?;
    let name: String = row.try_get("name").map_err(decode_err)?;
    let scopes_json: String = row.try_get("scopes").map_err(decode_err)?;
    let quota_per_hour: i64 = row.try_get("quota_per_hour").map_err(decode_err)?;
    let active: bool = row.try_get("active").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let expires_at: Option<String> = row.try_get("expires_at").map_err(decode_err)?;
    let last_used_at: Option<String> = row.try_get("last_used_at").map_err(decode_err)?;
    let total_requests: i64 = row.try_get("total_requests").map_err(decode_err)?;
    let current_hour_requests: i64 = row.try_get("current_hour_requests").map_err(decode_err)?;
    let last_hour_reset: String = row.try_get("last_hour_reset").map_err(decode_err)?;

    let scopes: BTreeSet<String> = serde_json::from_str(&scopes_json).map_err(decode_err)?;

    Ok(ApiKey {
        key_id: KeyId(key_id),
        key_hash,
        name,
        scopes,
        quota_per_hour: u32::try_from(quota_per_hour).map_err(decode_err)?,
        active,
        created_at: parse_timestamp(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        last_used_at: last_used_at.as_deref().map(parse_timestamp).transpose()?,
        usage: UsageCounters {
            total_requests: u64::try_from(total_requests).map_err(decode_err)?,
            current_hour_requests: u32::try_from(current_hour_requests).map_err(decode_err)?,
            last_hour_reset: parse_timestamp(&last_hour_reset)?,
        },
    })
}

impl SqlApiKeyRepository {
    async fn insert_row(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        let scopes = serde_json::to_string(&key.scopes).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO api_keys (key_id, key_hash, name, scopes, quota_per_hour, active,
                                   created_at, expires_at, last_used_at, total_requests,
                                   current_hour_requests, last_hour_reset)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.key_id.as_str())
        .bind(&key.key_hash)
        .bind(&key.name)
        .bind(scopes)
        .bind(i64::from(key.quota_per_hour))
        .bind(key.active)
        .bind(format_timestamp(key.created_at))
        .bind(key.expires_at.map(format_timestamp))
        .bind(key.last_used_at.map(format_timestamp))
        .bind(i64::try_from(key.usage.total_requests).unwrap_or(i64::MAX))
        .bind(i64::from(key.usage.current_hour_requests))
        .bind(format_timestamp(key.usage.last_hour_reset))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_one_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<ApiKey>, RepositoryError> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE {column} = ?");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn bump_usage(
        &self,
        key_id: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, RepositoryError> {
        let cutoff = format_timestamp(now - Duration::hours(1));
        let now = format_timestamp(now);
        let sql = format!(
            "UPDATE api_keys SET
                 current_hour_requests = CASE WHEN last_hour_reset < ?1 THEN 1
                                              ELSE current_hour_requests + 1 END,
                 last_hour_reset = CASE WHEN last_hour_reset < ?1 THEN ?2
                                        ELSE last_hour_reset END,
                 total_requests = total_requests + 1,
                 last_used_at = ?2
             WHERE key_id = ?3
               AND active = 1
               AND (expires_at IS NULL OR expires_at > ?2)
             RETURNING {KEY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(cutoff)
            .bind(now)
            .bind(key_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn fetch_all(&self) -> Result<Vec<ApiKey>, RepositoryError> {
        let sql = format!("SELECT {KEY_COLUMNS} FROM api_keys ORDER BY created_at, key_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_api_key).collect()
    }
}

#[async_trait]
impl ApiKeyStore for SqlApiKeyRepository {
    async fn insert(&self, key: ApiKey) -> Result<(), StoreError> {
        Ok(self.insert_row(&key).await?)
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.fetch_one_by("key_hash", key_hash).await?)
    }

    async fn find_by_key_id(&self, key_id: &KeyId) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.fetch_one_by("key_id", key_id.as_str()).await?)
    }

    async fn record_usage(
        &self,
        key_id: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.bump_usage(key_id, now).await?)
    }

    async fn deactivate(&self, key_id: &KeyId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE key_id = ?")
            .bind(key_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self.fetch_all().await?)
    }
}
