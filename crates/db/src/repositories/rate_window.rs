use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::Row;

use bridgeway_core::errors::StoreError;
use bridgeway_core::rate_limit::{Admission, RateWindowStore, WindowSnapshot};

use super::{decode_err, RepositoryError};
use crate::DbPool;

/// Sliding-window log kept in `rate_window_entries`, one row per admitted request.
pub struct SqlRateWindowStore {
    pool: DbPool,
}

impl SqlRateWindowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn admit_in_tx(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        quota: u32,
    ) -> Result<Admission, RepositoryError> {
        let now_ms = now.timestamp_millis();
        let cutoff_ms = (now - window).timestamp_millis();
        let mut tx = self.pool.begin().await?;

        // The DELETE runs first so SQLite takes the write lock before the count is read.
        sqlx::query("DELETE FROM rate_window_entries WHERE window_key = ? AND requested_at_ms <= ?")
            .bind(key)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;

        let mut snapshot = load_snapshot(&mut tx, key).await?;
        let admitted = snapshot.count < quota;
        if admitted {
            sqlx::query(
                "INSERT INTO rate_window_entries (window_key, requested_at_ms) VALUES (?, ?)",
            )
                .bind(key)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;
            snapshot.count += 1;
            snapshot.oldest = Some(snapshot.oldest.map_or(now, |oldest| oldest.min(now)));
        }

        tx.commit().await?;
        Ok(Admission { admitted, window: snapshot })
    }

    async fn snapshot_after_evict(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowSnapshot, RepositoryError> {
        let cutoff_ms = (now - window).timestamp_millis();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rate_window_entries WHERE window_key = ? AND requested_at_ms <= ?")
            .bind(key)
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?;
        let snapshot = load_snapshot(&mut tx, key).await?;
        tx.commit().await?;
        Ok(snapshot)
    }
}

async fn load_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &str,
) -> Result<WindowSnapshot, RepositoryError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count, MIN(requested_at_ms) AS oldest
         FROM rate_window_entries WHERE window_key = ?",
    )
    .bind(key)
    .fetch_one(&mut **tx)
    .await?;

    let count: i64 = row.try_get("count").map_err(decode_err)?;
    let oldest_ms: Option<i64> = row.try_get("oldest").map_err(decode_err)?;
    let oldest = match oldest_ms {
        Some(ms) => Some(
            Utc.timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| RepositoryError::Decode(format!("invalid timestamp {ms}")))?,
        ),
        None => None,
    };

    Ok(WindowSnapshot { count: u32::try_from(count).map_err(decode_err)?, oldest })
}

#[async_trait]
impl RateWindowStore for SqlRateWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        quota: u32,
    ) -> Result<Admission, StoreError> {
        Ok(self.admit_in_tx(key, now, window, quota).await?)
    }

    async fn snapshot(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        Ok(self.snapshot_after_evict(key, now, window).await?)
    }

    async fn reset(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM rate_window_entries WHERE window_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use bridgeway_core::rate_limit::RateWindowStore;

    use super::SqlRateWindowStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlRateWindowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlRateWindowStore::new(pool)
    }

    #[tokio::test]
    async fn admits_up_to_quota_then_rejects_without_recording() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let window = Duration::seconds(60);

        for offset in 0..2 {
            let admission = store
                .admit("rate_limit:user:U1", now + Duration::seconds(offset), window, 2)
                .await
                .expect("admit");
            assert!(admission.admitted);
        }

        let rejected = store
            .admit("rate_limit:user:U1", now + Duration::seconds(3), window, 2)
            .await
            .expect("admit");
        assert!(!rejected.admitted);
        assert_eq!(rejected.window.count, 2);
        assert_eq!(rejected.window.oldest, Some(now));
    }

    #[tokio::test]
    async fn stale_entries_are_evicted_lazily() {
        let store = store().await;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let window = Duration::seconds(60);

        store.admit("k", now, window, 1).await.expect("admit");
        let later = store.admit("k", now + Duration::seconds(59), window, 1).await.expect("admit");
        assert!(!later.admitted);

        let later = store.admit("k", now + Duration::seconds(61), window, 1).await.expect("admit");
        assert!(later.admitted);
        assert_eq!(later.window.count, 1);
        assert_eq!(later.window.oldest, Some(now + Duration::seconds(61)));
    }

    #[tokio::test]
    async fn reset_and_snapshot() {
        let store = store().await;
        let now = Utc::now();
        let window = Duration::seconds(60);

        store.admit("k", now, window, 5).await.expect("admit");
        store.admit("other", now, window, 5).await.expect("admit");
        assert_eq!(store.snapshot("k", now, window).await.expect("snapshot").count, 1);

        assert!(store.reset("k").await.expect("reset"));
        assert!(!store.reset("k").await.expect("reset again"));
        assert_eq!(store.snapshot("k", now, window).await.expect("snapshot").count, 0);
        assert_eq!(store.snapshot("other", now, window).await.expect("snapshot").count, 1);
    }
}
