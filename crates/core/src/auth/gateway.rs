use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::api_keys::ApiKeyManager;
use crate::domain::api_key::ApiKey;
use crate::errors::AuthError;
use crate::rate_limit::{LimitType, RateLimit, RateLimitDecision, RateLimiter};
use crate::signature::{SignatureVerifier, WebhookSignature, WebhookSource};

#[derive(Clone, Debug)]
pub struct WebhookSecrets {
    pub slack_signing_secret: SecretString,
    pub notion_webhook_secret: Option<SecretString>,
}

/// A request that passed every admission stage.
#[derive(Clone, Debug)]
pub struct Admitted {
    pub key: ApiKey,
    pub rate_limit: RateLimitDecision,
}

/// Composes signature checks, key validation, rate limiting and scope checks.
///
/// Stages run in a fixed order and the first rejection is final.
pub struct AuthGateway {
    keys: Arc<ApiKeyManager>,
    limiter: Arc<RateLimiter>,
    verifier: SignatureVerifier,
    secrets: WebhookSecrets,
}

impl AuthGateway {
    pub fn new(
        keys: Arc<ApiKeyManager>,
        limiter: Arc<RateLimiter>,
        verifier: SignatureVerifier,
        secrets: WebhookSecrets,
    ) -> Self {
        Self { keys, limiter, verifier, secrets }
    }

    pub fn keys(&self) -> &Arc<ApiKeyManager> {
        &self.keys
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn authorize_webhook(
        &self,
        source: WebhookSource,
        request: WebhookSignature<'_>,
    ) -> Result<(), AuthError> {
        self.authorize_webhook_at(source, request, Utc::now())
    }

    pub fn authorize_webhook_at(
        &self,
        source: WebhookSource,
        request: WebhookSignature<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let secret = match source {
            WebhookSource::Slack => self.secrets.slack_signing_secret.expose_secret(),
            WebhookSource::Notion => match &self.secrets.notion_webhook_secret {
                Some(secret) => secret.expose_secret(),
                None => {
                    warn!(
                        event_name = "auth.webhook.unconfigured",
                        source = source.as_str(),
                        "no webhook secret configured, rejecting"
                    );
                    return Err(AuthError::authentication("webhook secret not configured"));
                }
            },
        };

        if self.verifier.verify_at(source, request, secret, now) {
            Ok(())
        } else {
            info!(
                event_name = "auth.webhook.rejected",
                source = source.as_str(),
                "invalid webhook signature"
            );
            Err(AuthError::authentication("invalid webhook signature"))
        }
    }

    pub async fn authorize_request(
        &self,
        bearer: Option<&str>,
        required_scope: &str,
    ) -> Result<Admitted, AuthError> {
        self.authorize_request_at(bearer, required_scope, Utc::now()).await
    }

    /// Key validation (hard), then the key's own rate window (soft), then scope (hard).
    pub async fn authorize_request_at(
        &self,
        bearer: Option<&str>,
        required_scope: &str,
        now: DateTime<Utc>,
    ) -> Result<Admitted, AuthError> {
        let Some(secret) = bearer.map(str::trim).filter(|value| !value.is_empty()) else {
            return Err(AuthError::authentication("missing bearer credential"));
        };

        let key = match self.keys.validate_at(secret, now).await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(AuthError::authentication("invalid or expired API key")),
            Err(error) => {
                warn!(
                    event_name = "auth.key_store.unavailable",
                    error = %error,
                    "rejecting request while key store is unavailable"
                );
                return Err(AuthError::from(error));
            }
        };

        let limit = match self.limiter.custom_limit(key.key_id.as_str(), LimitType::Api).await {
            Some(limit) => limit,
            None => {
                let base = self.limiter.limit_for(key.key_id.as_str(), LimitType::Api).await;
                RateLimit::new(key.quota_per_hour, base.window_secs)
            }
        };
        let decision = self
            .limiter
            .check_with_limit_at(key.key_id.as_str(), LimitType::Api, limit, now)
            .await;
        if !decision.allowed {
            return Err(rate_limited(&decision, now));
        }

        if !self.keys.check_scope(&key, required_scope) {
            debug!(
                event_name = "auth.scope.denied",
                key_id = %key.key_id,
                required_scope,
                "key lacks required scope"
            );
            return Err(AuthError::AuthorizationFailure { required: required_scope.to_string() });
        }

        Ok(Admitted { key, rate_limit: decision })
    }

    /// Rate check for unauthenticated traffic classes (webhook sources, Slack users).
    pub async fn throttle(
        &self,
        identifier: &str,
        limit_type: LimitType,
    ) -> Result<RateLimitDecision, AuthError> {
        let now = Utc::now();
        let decision = self.limiter.check_at(identifier, limit_type, now).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(rate_limited(&decision, now))
        }
    }
}

fn rate_limited(decision: &RateLimitDecision, now: DateTime<Utc>) -> AuthError {
    AuthError::RateLimitExceeded {
        limit_type: decision.limit_type.as_str().to_string(),
        limit: decision.limit,
        reset_at: decision.reset_at_unix(),
        retry_after_secs: decision.retry_after_secs(now),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use secrecy::{ExposeSecret, SecretString};

    use super::{AuthGateway, WebhookSecrets};
    use crate::auth::api_keys::{ApiKeyManager, NewApiKey};
    use crate::auth::scopes::ScopePolicy;
    use crate::auth::store::{ApiKeyStore, InMemoryApiKeyStore};
    use crate::domain::api_key::{ApiKey, KeyId};
    use crate::errors::{ErrorKind, StoreError};
    use crate::rate_limit::{
        Admission, InMemoryRateWindowStore, LimitType, RateLimit, RateLimiter, RateWindowStore,
        WindowSnapshot,
    };
    use crate::signature::{
        sign_hex, slack_signature, SignatureVerifier, WebhookSignature, WebhookSource,
    };

    struct UnavailableKeyStore;

    fn lock_timeout() -> StoreError {
        StoreError::Unavailable("database is locked".to_owned())
    }

    #[async_trait]
    impl ApiKeyStore for UnavailableKeyStore {
        async fn insert(&self, _key: ApiKey) -> Result<(), StoreError> {
            Err(lock_timeout())
        }

        async fn find_by_hash(&self, _key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
            Err(lock_timeout())
        }

        async fn find_by_key_id(&self, _key_id: &KeyId) -> Result<Option<ApiKey>, StoreError> {
            Err(lock_timeout())
        }

        async fn record_usage(
            &self,
            _key_id: &KeyId,
            _now: DateTime<Utc>,
        ) -> Result<Option<ApiKey>, StoreError> {
            Err(lock_timeout())
        }

        async fn deactivate(&self, _key_id: &KeyId) -> Result<bool, StoreError> {
            Err(lock_timeout())
        }

        async fn list(&self) -> Result<Vec<ApiKey>, StoreError> {
            Err(lock_timeout())
        }
    }

    /// Counts every store operation the limiter performs.
    #[derive(Default)]
    struct CountingWindowStore {
        inner: InMemoryRateWindowStore,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RateWindowStore for CountingWindowStore {
        async fn admit(
            &self,
            key: &str,
            now: DateTime<Utc>,
            window: Duration,
            quota: u32,
        ) -> Result<Admission, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.admit(key, now, window, quota).await
        }

        async fn snapshot(
            &self,
            key: &str,
            now: DateTime<Utc>,
            window: Duration,
        ) -> Result<WindowSnapshot, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.snapshot(key, now, window).await
        }

        async fn reset(&self, key: &str) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.reset(key).await
        }
    }

    fn gateway(notion_secret: Option<&str>) -> AuthGateway {
        let keys = Arc::new(ApiKeyManager::new(
            Arc::new(InMemoryApiKeyStore::new()),
            ScopePolicy::default(),
            1000,
        ));
        let limiter = Arc::new(RateLimiter::new(Arc::new(InMemoryRateWindowStore::new())));
        AuthGateway::new(
            keys,
            limiter,
            SignatureVerifier::default(),
            WebhookSecrets {
                slack_signing_secret: SecretString::from("slack-secret".to_owned()),
                notion_webhook_secret: notion_secret
                    .map(|value| SecretString::from(value.to_owned())),
            },
        )
    }

    #[test]
    fn webhook_signatures_gate_both_sources() {
        let gateway = gateway(Some("notion-secret"));
        let body = br#"{"type":"page.created"}"#;
        let notion = sign_hex("notion-secret", body).expect("signature");

        assert!(gateway
            .authorize_webhook(
                WebhookSource::Notion,
                WebhookSignature { body, signature: &notion, timestamp: None },
            )
            .is_ok());

        let now = Utc::now();
        let timestamp = now.timestamp().to_string();
        let slack = slack_signature("slack-secret", &timestamp, body).expect("signature");
        assert!(gateway
            .authorize_webhook_at(
                WebhookSource::Slack,
                WebhookSignature { body, signature: &slack, timestamp: Some(&timestamp) },
                now,
            )
            .is_ok());

        let rejected = gateway
            .authorize_webhook(
                WebhookSource::Notion,
                WebhookSignature { body: b"{}", signature: &notion, timestamp: None },
            )
            .expect_err("tampered body must fail");
        assert_eq!(rejected.kind(), ErrorKind::AuthenticationFailure);
    }

    #[test]
    fn notion_webhooks_rejected_without_configured_secret() {
        let gateway = gateway(None);
        let body = b"{}";
        let signature = sign_hex("anything", body).expect("signature");

        let error = gateway
            .authorize_webhook(
                WebhookSource::Notion,
                WebhookSignature { body, signature: &signature, timestamp: None },
            )
            .expect_err("must fail closed");
        assert_eq!(error.kind(), ErrorKind::AuthenticationFailure);
    }

    #[tokio::test]
    async fn missing_or_unknown_bearer_is_authentication_failure() {
        let gateway = gateway(None);

        let missing = gateway.authorize_request(None, "notion:read").await.expect_err("missing");
        assert_eq!(missing.kind(), ErrorKind::AuthenticationFailure);

        let unknown = gateway
            .authorize_request(Some("bwk_not-a-real-key"), "notion:read")
            .await
            .expect_err("unknown");
        assert_eq!(unknown.kind(), ErrorKind::AuthenticationFailure);
    }

    #[tokio::test]
    async fn key_store_outage_fails_closed_before_rate_limiting() {
        let windows = Arc::new(CountingWindowStore::default());
        let keys = Arc::new(ApiKeyManager::new(
            Arc::new(UnavailableKeyStore),
            ScopePolicy::default(),
            1000,
        ));
        let gateway = AuthGateway::new(
            keys,
            Arc::new(RateLimiter::new(Arc::clone(&windows) as Arc<dyn RateWindowStore>)),
            SignatureVerifier::default(),
            WebhookSecrets {
                slack_signing_secret: SecretString::from("slack-secret".to_owned()),
                notion_webhook_secret: None,
            },
        );

        let error = gateway
            .authorize_request(Some("bwk_well-formed-secret"), "notion:read")
            .await
            .expect_err("store outage must reject");
        assert_eq!(error.kind(), ErrorKind::BackingStoreUnavailable);
        assert_eq!(error.http_status(), 503);
        assert_eq!(windows.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn operator_custom_limit_takes_precedence_over_key_quota() {
        let gateway = gateway(None);
        let created = gateway
            .keys()
            .create(NewApiKey {
                name: "batch".to_owned(),
                scopes: vec!["notion:read".to_owned()],
                quota_per_hour: Some(100),
                expires_in_days: None,
            })
            .await
            .expect("create");
        gateway
            .limiter()
            .set_custom_limit(created.key_id.as_str(), LimitType::Api, RateLimit::new(1, 3600))
            .await;

        let secret = created.secret.expose_secret();
        let now = Utc::now();
        assert!(gateway.authorize_request_at(Some(secret), "notion:read", now).await.is_ok());
        let error = gateway
            .authorize_request_at(Some(secret), "notion:read", now + Duration::seconds(1))
            .await
            .expect_err("custom limit of one");
        assert_eq!(error.kind(), ErrorKind::RateLimitExceeded);
    }
}
