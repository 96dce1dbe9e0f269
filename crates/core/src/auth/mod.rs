pub mod api_keys;
pub mod gateway;
pub mod scopes;
pub mod store;

pub use api_keys::{ApiKeyError, ApiKeyManager, CreatedApiKey, NewApiKey};
pub use gateway::{Admitted, AuthGateway, WebhookSecrets};
pub use scopes::{Role, ScopePolicy};
pub use store::{ApiKeyStore, InMemoryApiKeyStore};
