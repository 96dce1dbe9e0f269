use std::str::FromStr;
use std::sync::Arc;

use bridgeway_core::auth::scopes::with_role_scopes;
use bridgeway_core::config::AppConfig;
use bridgeway_core::{ApiKeyError, ApiKeyManager, KeyId, NewApiKey, Role, ScopePolicy};
use bridgeway_db::{DbPool, SqlApiKeyRepository};
use secrecy::ExposeSecret;
use serde_json::json;

use crate::commands::{with_database, CommandResult};

#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub name: String,
    pub scopes: Vec<String>,
    pub role: Option<String>,
    pub quota_per_hour: Option<u32>,
    pub expires_in_days: Option<u32>,
}

fn manager(config: &AppConfig, pool: DbPool) -> ApiKeyManager {
    ApiKeyManager::new(
        Arc::new(SqlApiKeyRepository::new(pool)),
        ScopePolicy::new(config.auth.legacy_open_scopes),
        config.auth.default_quota_per_hour,
    )
}

pub fn create(args: CreateArgs) -> CommandResult {
    let role = match args.role.as_deref().map(Role::from_str).transpose() {
        Ok(role) => role,
        Err(error) => return CommandResult::failure("keys.create", "invalid_request", error, 6),
    };

    let request = NewApiKey {
        name: args.name,
        scopes: with_role_scopes(args.scopes, role),
        quota_per_hour: args.quota_per_hour,
        expires_in_days: args.expires_in_days,
    };
    let result = with_database("keys.create", |config, pool| async move {
        manager(&config, pool).create(request).await.map_err(|error| match error {
            ApiKeyError::InvalidRequest(message) => {
                CommandResult::failure("keys.create", "invalid_request", message, 6)
            }
            ApiKeyError::ScopeNotGrantable(scope) => CommandResult::failure(
                "keys.create",
                "authorization_failure",
                format!("scope `{scope}` cannot be granted"),
                6,
            ),
            ApiKeyError::Store(error) => {
                CommandResult::failure("keys.create", "store", error.to_string(), 7)
            }
        })
    });

    match result {
        Ok(created) => CommandResult::success_with(
            "keys.create",
            "API key created; store the secret now, it is not shown again",
            Some(json!({
                "key_id": created.key_id,
                "secret": created.secret.expose_secret(),
                "metadata": created.metadata,
            })),
        ),
        Err(result) => result,
    }
}

pub fn list() -> CommandResult {
    let result = with_database("keys.list", |config, pool| async move {
        manager(&config, pool)
            .list()
            .await
            .map_err(|error| CommandResult::failure("keys.list", "store", error.to_string(), 7))
    });

    match result {
        Ok(keys) => CommandResult::success_with(
            "keys.list",
            format!("{} API key(s)", keys.len()),
            Some(json!({ "keys": keys })),
        ),
        Err(result) => result,
    }
}

pub fn revoke(key_id: &str) -> CommandResult {
    let key_id = KeyId(key_id.to_string());
    let lookup = key_id.clone();
    let result = with_database("keys.revoke", |config, pool| async move {
        manager(&config, pool)
            .revoke(&lookup)
            .await
            .map_err(|error| CommandResult::failure("keys.revoke", "store", error.to_string(), 7))
    });

    match result {
        Ok(true) => CommandResult::success("keys.revoke", format!("revoked {key_id}")),
        Ok(false) => CommandResult::failure(
            "keys.revoke",
            "not_found",
            format!("API key {key_id} not found"),
            6,
        ),
        Err(result) => result,
    }
}
