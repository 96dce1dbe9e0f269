use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::errors::StoreError;

/// Requests still inside the trailing window after eviction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    pub oldest: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub admitted: bool,
    pub window: WindowSnapshot,
}

/// Ordered time-series store behind the sliding-window limiter.
///
/// `admit` must evict, count and conditionally record as one atomic step so
/// that concurrent callers never admit more than `quota` requests.
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        quota: u32,
    ) -> Result<Admission, StoreError>;

    async fn snapshot(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Drops every recorded request for `key`. Returns whether anything was removed.
    async fn reset(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRateWindowStore {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryRateWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn evict(entries: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while entries.front().is_some_and(|oldest| *oldest <= cutoff) {
        entries.pop_front();
    }
}

fn snapshot_of(entries: &VecDeque<DateTime<Utc>>) -> WindowSnapshot {
    WindowSnapshot {
        count: u32::try_from(entries.len()).unwrap_or(u32::MAX),
        oldest: entries.front().copied(),
    }
}

#[async_trait]
impl RateWindowStore for InMemoryRateWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        quota: u32,
    ) -> Result<Admission, StoreError> {
        let mut windows = self.windows.lock().await;
        let entries = windows.entry(key.to_string()).or_default();
        evict(entries, now - window);

        let admitted = entries.len() < quota as usize;
        if admitted {
            // Keep the deque ordered even if a caller passes a skewed clock.
            let position = entries.partition_point(|at| *at <= now);
            entries.insert(position, now);
        }

        Ok(Admission { admitted, window: snapshot_of(entries) })
    }

    async fn snapshot(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut windows = self.windows.lock().await;
        let Some(entries) = windows.get_mut(key) else {
            return Ok(WindowSnapshot::default());
        };
        evict(entries, now - window);
        Ok(snapshot_of(entries))
    }

    async fn reset(&self, key: &str) -> Result<bool, StoreError> {
        let mut windows = self.windows.lock().await;
        Ok(windows.remove(key).is_some_and(|entries| !entries.is_empty()))
    }
}
