//! Sliding-window rate limiting over a shared [`RateWindowStore`].
//!
//! Each identifier keeps a log of request timestamps inside the trailing
//! window. A request is admitted only while the log holds fewer than `quota`
//! entries; rejected requests are not recorded. When the store cannot be
//! reached the limiter admits the request and marks the decision `degraded`.

pub mod adaptive;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::StoreError;

pub use adaptive::{AdaptiveQuotaPolicy, LoadSample, QuotaPolicy};
pub use store::{Admission, InMemoryRateWindowStore, RateWindowStore, WindowSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Api,
    Webhook,
    User,
    Ip,
    SlackCommand,
    NotionApi,
    SlackApi,
}

impl LimitType {
    pub const ALL: [LimitType; 7] = [
        Self::Api,
        Self::Webhook,
        Self::User,
        Self::Ip,
        Self::SlackCommand,
        Self::NotionApi,
        Self::SlackApi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Webhook => "webhook",
            Self::User => "user",
            Self::Ip => "ip",
            Self::SlackCommand => "slack_command",
            Self::NotionApi => "notion_api",
            Self::SlackApi => "slack_api",
        }
    }

    pub fn default_limit(self) -> RateLimit {
        match self {
            Self::Api => RateLimit::new(1000, 3600),
            Self::Webhook => RateLimit::new(100, 60),
            Self::User => RateLimit::new(60, 60),
            Self::Ip => RateLimit::new(100, 60),
            Self::SlackCommand => RateLimit::new(10, 60),
            Self::NotionApi => RateLimit::new(1000, 3600),
            Self::SlackApi => RateLimit::new(50, 60),
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown limit type `{0}`")]
pub struct UnknownLimitType(pub String);

impl FromStr for LimitType {
    type Err = UnknownLimitType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|limit_type| limit_type.as_str() == value)
            .ok_or_else(|| UnknownLimitType(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    pub window_secs: u64,
}

impl RateLimit {
    pub const fn new(requests: u32, window_secs: u64) -> Self {
        Self { requests, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.window_secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitTable {
    limits: HashMap<LimitType, RateLimit>,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            limits: LimitType::ALL
                .into_iter()
                .map(|limit_type| (limit_type, limit_type.default_limit()))
                .collect(),
        }
    }
}

impl RateLimitTable {
    pub fn get(&self, limit_type: LimitType) -> RateLimit {
        self.limits.get(&limit_type).copied().unwrap_or_else(|| limit_type.default_limit())
    }

    pub fn with_limit(mut self, limit_type: LimitType, limit: RateLimit) -> Self {
        self.limits.insert(limit_type, limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit_type: LimitType,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub current_count: u32,
    pub window_secs: u64,
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn reset_at_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Whole seconds until the oldest request leaves the window, at least one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        let secs = u64::try_from(millis).unwrap_or(0).div_ceil(1000);
        secs.max(1)
    }
}

pub fn window_key(limit_type: LimitType, identifier: &str) -> String {
    format!("rate_limit:{}:{identifier}", limit_type.as_str())
}

pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    table: RateLimitTable,
    custom_limits: RwLock<HashMap<(LimitType, String), RateLimit>>,
    policy: Option<Arc<dyn QuotaPolicy>>,
    enabled: bool,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("table", &self.table)
            .field("adaptive", &self.policy.is_some())
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateWindowStore>) -> Self {
        Self {
            store,
            table: RateLimitTable::default(),
            custom_limits: RwLock::new(HashMap::new()),
            policy: None,
            enabled: true,
        }
    }

    pub fn with_table(mut self, table: RateLimitTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn QuotaPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn set_custom_limit(
        &self,
        identifier: impl Into<String>,
        limit_type: LimitType,
        limit: RateLimit,
    ) {
        self.custom_limits.write().await.insert((limit_type, identifier.into()), limit);
    }

    pub async fn clear_custom_limit(&self, identifier: &str, limit_type: LimitType) -> bool {
        self.custom_limits.write().await.remove(&(limit_type, identifier.to_string())).is_some()
    }

    pub async fn custom_limit(&self, identifier: &str, limit_type: LimitType) -> Option<RateLimit> {
        self.custom_limits.read().await.get(&(limit_type, identifier.to_string())).copied()
    }

    /// Limit in force for `identifier`, before any adaptive scaling.
    pub async fn limit_for(&self, identifier: &str, limit_type: LimitType) -> RateLimit {
        self.custom_limit(identifier, limit_type)
            .await
            .unwrap_or_else(|| self.table.get(limit_type))
    }

    pub async fn check(&self, identifier: &str, limit_type: LimitType) -> RateLimitDecision {
        self.check_at(identifier, limit_type, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        limit_type: LimitType,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let limit = self.limit_for(identifier, limit_type).await;
        self.check_with_limit_at(identifier, limit_type, limit, now).await
    }

    /// Admission check against an explicit limit, e.g. an API key's own quota.
    pub async fn check_with_limit(
        &self,
        identifier: &str,
        limit_type: LimitType,
        limit: RateLimit,
    ) -> RateLimitDecision {
        self.check_with_limit_at(identifier, limit_type, limit, Utc::now()).await
    }

    pub async fn check_with_limit_at(
        &self,
        identifier: &str,
        limit_type: LimitType,
        limit: RateLimit,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let quota = self.effective_quota(limit_type, limit.requests, now);
        let window = limit.window();

        if !self.enabled {
            return RateLimitDecision {
                allowed: true,
                limit_type,
                limit: quota,
                remaining: quota,
                reset_at: now + window,
                current_count: 0,
                window_secs: limit.window_secs,
                degraded: false,
            };
        }

        let key = window_key(limit_type, identifier);
        match self.store.admit(&key, now, window, quota).await {
            Ok(admission) => {
                let decision = decision_from(
                    limit_type,
                    quota,
                    limit.window_secs,
                    admission.admitted,
                    admission.window,
                    now,
                    window,
                );
                if !decision.allowed {
                    debug!(
                        event_name = "rate_limit.rejected",
                        limit_type = limit_type.as_str(),
                        identifier,
                        limit = quota,
                        current_count = decision.current_count,
                        "request over quota"
                    );
                }
                decision
            }
            Err(error) => fail_open(limit_type, quota, limit.window_secs, now, window, &error),
        }
    }

    /// Current window state without recording a request.
    pub async fn status(&self, identifier: &str, limit_type: LimitType) -> RateLimitDecision {
        self.status_at(identifier, limit_type, Utc::now()).await
    }

    pub async fn status_at(
        &self,
        identifier: &str,
        limit_type: LimitType,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let limit = self.limit_for(identifier, limit_type).await;
        let quota = self.effective_quota(limit_type, limit.requests, now);
        let window = limit.window();
        let key = window_key(limit_type, identifier);

        match self.store.snapshot(&key, now, window).await {
            Ok(snapshot) => {
                let allowed = snapshot.count < quota;
                decision_from(limit_type, quota, limit.window_secs, allowed, snapshot, now, window)
            }
            Err(error) => fail_open(limit_type, quota, limit.window_secs, now, window, &error),
        }
    }

    pub async fn reset(&self, identifier: &str, limit_type: LimitType) -> Result<bool, StoreError> {
        let key = window_key(limit_type, identifier);
        let cleared = self.store.reset(&key).await?;
        debug!(
            event_name = "rate_limit.reset",
            limit_type = limit_type.as_str(),
            identifier,
            cleared,
            "rate limit window reset"
        );
        Ok(cleared)
    }

    fn effective_quota(&self, limit_type: LimitType, base: u32, now: DateTime<Utc>) -> u32 {
        match &self.policy {
            Some(policy) => policy.effective_quota(limit_type, base, now),
            None => base,
        }
    }
}

fn decision_from(
    limit_type: LimitType,
    quota: u32,
    window_secs: u64,
    allowed: bool,
    snapshot: WindowSnapshot,
    now: DateTime<Utc>,
    window: Duration,
) -> RateLimitDecision {
    let reset_at = snapshot.oldest.map(|oldest| oldest + window).unwrap_or(now + window);
    RateLimitDecision {
        allowed,
        limit_type,
        limit: quota,
        remaining: quota.saturating_sub(snapshot.count),
        reset_at,
        current_count: snapshot.count,
        window_secs,
        degraded: false,
    }
}

fn fail_open(
    limit_type: LimitType,
    quota: u32,
    window_secs: u64,
    now: DateTime<Utc>,
    window: Duration,
    error: &StoreError,
) -> RateLimitDecision {
    warn!(
        event_name = "rate_limit.degraded",
        limit_type = limit_type.as_str(),
        error = %error,
        "rate window store unavailable, admitting request"
    );
    RateLimitDecision {
        allowed: true,
        limit_type,
        limit: quota,
        remaining: quota,
        reset_at: now + window,
        current_count: 0,
        window_secs,
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{
        window_key, Admission, InMemoryRateWindowStore, LimitType, RateLimit, RateLimitTable,
        RateLimiter, RateWindowStore, WindowSnapshot,
    };
    use crate::errors::StoreError;

    struct UnavailableStore;

    #[async_trait]
    impl RateWindowStore for UnavailableStore {
        async fn admit(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
            _window: Duration,
            _quota: u32,
        ) -> Result<Admission, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        async fn snapshot(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
            _window: Duration,
        ) -> Result<WindowSnapshot, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }

        async fn reset(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_owned()))
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn limiter_with(limit_type: LimitType, limit: RateLimit) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryRateWindowStore::new()))
            .with_table(RateLimitTable::default().with_limit(limit_type, limit))
    }

    #[test]
    fn default_table_matches_documented_limits() {
        let table = RateLimitTable::default();
        assert_eq!(table.get(LimitType::Api), RateLimit::new(1000, 3600));
        assert_eq!(table.get(LimitType::Webhook), RateLimit::new(100, 60));
        assert_eq!(table.get(LimitType::User), RateLimit::new(60, 60));
        assert_eq!(table.get(LimitType::Ip), RateLimit::new(100, 60));
        assert_eq!(table.get(LimitType::SlackCommand), RateLimit::new(10, 60));
        assert_eq!(table.get(LimitType::NotionApi), RateLimit::new(1000, 3600));
        assert_eq!(table.get(LimitType::SlackApi), RateLimit::new(50, 60));
    }

    #[test]
    fn limit_types_parse_from_wire_names() {
        for limit_type in LimitType::ALL {
            assert_eq!(limit_type.as_str().parse::<LimitType>(), Ok(limit_type));
        }
        assert!("burst".parse::<LimitType>().is_err());
        assert_eq!(window_key(LimitType::SlackCommand, "U1"), "rate_limit:slack_command:U1");
    }

    #[tokio::test]
    async fn quota_requests_pass_then_next_is_rejected() {
        let limiter = limiter_with(LimitType::User, RateLimit::new(3, 60));
        let now = start();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("U1", LimitType::User, now).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = limiter.check_at("U1", LimitType::User, now + Duration::seconds(1)).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.current_count, 3);
        assert_eq!(rejected.reset_at, now + Duration::seconds(60));
        assert_eq!(rejected.retry_after_secs(now + Duration::seconds(1)), 59);
        assert!(!rejected.degraded);
    }

    #[tokio::test]
    async fn capacity_returns_after_the_window() {
        let limiter = limiter_with(LimitType::User, RateLimit::new(2, 60));
        let now = start();

        limiter.check_at("U1", LimitType::User, now).await;
        limiter.check_at("U1", LimitType::User, now).await;
        assert!(!limiter.check_at("U1", LimitType::User, now).await.allowed);

        let later = limiter.check_at("U1", LimitType::User, now + Duration::seconds(61)).await;
        assert!(later.allowed);
        assert_eq!(later.current_count, 1);
    }

    #[tokio::test]
    async fn identifiers_and_limit_types_are_isolated() {
        let limiter = limiter_with(LimitType::User, RateLimit::new(1, 60));
        let now = start();

        assert!(limiter.check_at("U1", LimitType::User, now).await.allowed);
        assert!(limiter.check_at("U2", LimitType::User, now).await.allowed);
        assert!(limiter.check_at("U1", LimitType::Ip, now).await.allowed);
        assert!(!limiter.check_at("U1", LimitType::User, now).await.allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open_and_marks_degraded() {
        let limiter = RateLimiter::new(Arc::new(UnavailableStore));

        let decision = limiter.check("kid_1", LimitType::Api).await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.limit, 1000);

        let status = limiter.status("kid_1", LimitType::Api).await;
        assert!(status.degraded);
        assert!(limiter.reset("kid_1", LimitType::Api).await.is_err());
    }

    #[tokio::test]
    async fn status_does_not_consume_quota() {
        let limiter = limiter_with(LimitType::Webhook, RateLimit::new(1, 60));
        let now = start();

        let before = limiter.status_at("notion", LimitType::Webhook, now).await;
        assert!(before.allowed);
        assert_eq!(before.current_count, 0);

        assert!(limiter.check_at("notion", LimitType::Webhook, now).await.allowed);
        let after = limiter.status_at("notion", LimitType::Webhook, now).await;
        assert!(!after.allowed);
        assert_eq!(after.current_count, 1);
    }

    #[tokio::test]
    async fn reset_restores_capacity() {
        let limiter = limiter_with(LimitType::SlackCommand, RateLimit::new(1, 60));
        let now = start();

        assert!(limiter.check_at("U1", LimitType::SlackCommand, now).await.allowed);
        assert!(limiter.reset("U1", LimitType::SlackCommand).await.expect("reset"));
        assert!(limiter.check_at("U1", LimitType::SlackCommand, now).await.allowed);
    }

    #[tokio::test]
    async fn custom_limit_overrides_table_for_one_identifier() {
        let limiter = limiter_with(LimitType::Api, RateLimit::new(5, 3600));
        limiter.set_custom_limit("kid_small", LimitType::Api, RateLimit::new(1, 3600)).await;
        let now = start();

        assert!(limiter.check_at("kid_small", LimitType::Api, now).await.allowed);
        assert!(!limiter.check_at("kid_small", LimitType::Api, now).await.allowed);
        assert_eq!(limiter.check_at("kid_other", LimitType::Api, now).await.limit, 5);

        assert!(limiter.clear_custom_limit("kid_small", LimitType::Api).await);
        assert_eq!(limiter.limit_for("kid_small", LimitType::Api).await.requests, 5);
    }

    #[tokio::test]
    async fn disabled_limiter_admits_without_touching_the_store() {
        let limiter = RateLimiter::new(Arc::new(UnavailableStore)).with_enabled(false);

        let decision = limiter.check("U1", LimitType::User).await;
        assert!(decision.allowed);
        assert!(!decision.degraded);
    }
}
