pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod signature;

pub use auth::{
    Admitted, ApiKeyError, ApiKeyManager, ApiKeyStore, AuthGateway, CreatedApiKey,
    InMemoryApiKeyStore, NewApiKey, Role, ScopePolicy, WebhookSecrets,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::api_key::{ApiKey, ApiKeyMetadata, KeyId, UsageCounters};
pub use errors::{AuthError, ErrorKind, StoreError};
pub use rate_limit::{
    AdaptiveQuotaPolicy, InMemoryRateWindowStore, LimitType, QuotaPolicy, RateLimit,
    RateLimitDecision, RateLimitTable, RateLimiter, RateWindowStore,
};
pub use retry::RetryPolicy;
pub use signature::{SignatureVerifier, WebhookSignature, WebhookSource};
