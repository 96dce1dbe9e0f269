use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bridgeway_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key_path: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key_path, value, env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = vec![
        field("database.url", config.database.url.clone(), &["BRIDGEWAY_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["BRIDGEWAY_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["BRIDGEWAY_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "slack.signing_secret",
            redact_secret(Some(&config.slack.signing_secret)),
            &["BRIDGEWAY_SLACK_SIGNING_SECRET"],
        ),
        field(
            "slack.bot_token",
            redact_token(config.slack.bot_token.as_ref()),
            &["BRIDGEWAY_SLACK_BOT_TOKEN"],
        ),
        field(
            "notion.webhook_secret",
            redact_secret(config.notion.webhook_secret.as_ref()),
            &["BRIDGEWAY_NOTION_WEBHOOK_SECRET"],
        ),
        field(
            "notion.integration_token",
            redact_secret(config.notion.integration_token.as_ref()),
            &["BRIDGEWAY_NOTION_INTEGRATION_TOKEN"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["BRIDGEWAY_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["BRIDGEWAY_SERVER_PORT", "PORT"]),
        field(
            "auth.legacy_open_scopes",
            config.auth.legacy_open_scopes.to_string(),
            &["BRIDGEWAY_AUTH_LEGACY_OPEN_SCOPES"],
        ),
        field(
            "auth.default_quota_per_hour",
            config.auth.default_quota_per_hour.to_string(),
            &["BRIDGEWAY_AUTH_DEFAULT_QUOTA_PER_HOUR"],
        ),
        field(
            "auth.signature_tolerance_secs",
            config.auth.signature_tolerance_secs.to_string(),
            &["BRIDGEWAY_AUTH_SIGNATURE_TOLERANCE_SECS"],
        ),
        field(
            "rate_limit.enabled",
            config.rate_limit.enabled.to_string(),
            &["BRIDGEWAY_RATE_LIMIT_ENABLED"],
        ),
        field(
            "rate_limit.adaptive",
            config.rate_limit.adaptive.to_string(),
            &["BRIDGEWAY_RATE_LIMIT_ADAPTIVE"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["BRIDGEWAY_LOGGING_LEVEL", "BRIDGEWAY_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["BRIDGEWAY_LOGGING_FORMAT", "BRIDGEWAY_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Field { key_path, value, env_keys } in fields {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key_path} = {value} (source: {source})"));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("bridgeway.toml"), PathBuf::from("config/bridgeway.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|value| value.expose_secret().trim().is_empty()) {
        None => "<unset>".to_string(),
        Some(true) => "<empty>".to_string(),
        Some(false) => "<redacted>".to_string(),
    }
}

/// Keeps the `xoxb-` style prefix so operators can tell token kinds apart.
fn redact_token(token: Option<&SecretString>) -> String {
    let Some(token) = token else {
        return "<unset>".to_string();
    };
    match token.expose_secret().trim().split_once('-') {
        Some((prefix, _)) => format!("{prefix}-***"),
        None => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{redact_secret, redact_token};

    #[test]
    fn redaction_never_echoes_secret_material() {
        let token = SecretString::from("xoxb-123-456".to_owned());
        assert_eq!(redact_token(Some(&token)), "xoxb-***");
        assert_eq!(redact_token(None), "<unset>");

        let secret = SecretString::from("abc123".to_owned());
        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(Some(&SecretString::from(String::new()))), "<empty>");
    }
}
