use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub notion: NotionConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub signing_secret: SecretString,
    pub bot_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct NotionConfig {
    pub webhook_secret: Option<SecretString>,
    pub integration_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Treat keys with an empty scope set as unrestricted.
    pub legacy_open_scopes: bool,
    pub default_quota_per_hour: u32,
    pub signature_tolerance_secs: i64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub adaptive: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_bot_token: Option<String>,
    pub notion_webhook_secret: Option<String>,
    pub server_port: Option<u16>,
    pub legacy_open_scopes: Option<bool>,
    pub rate_limit_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bridgeway.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig { signing_secret: String::new().into(), bot_token: None },
            notion: NotionConfig { webhook_secret: None, integration_token: None },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig {
                legacy_open_scopes: false,
                default_quota_per_hour: 1000,
                signature_tolerance_secs: 300,
            },
            rate_limit: RateLimitConfig { enabled: true, adaptive: false },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bridgeway.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = Some(secret_value(bot_token));
            }
        }

        if let Some(notion) = patch.notion {
            if let Some(webhook_secret) = notion.webhook_secret {
                self.notion.webhook_secret = Some(secret_value(webhook_secret));
            }
            if let Some(integration_token) = notion.integration_token {
                self.notion.integration_token = Some(secret_value(integration_token));
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(legacy_open_scopes) = auth.legacy_open_scopes {
                self.auth.legacy_open_scopes = legacy_open_scopes;
            }
            if let Some(default_quota_per_hour) = auth.default_quota_per_hour {
                self.auth.default_quota_per_hour = default_quota_per_hour;
            }
            if let Some(signature_tolerance_secs) = auth.signature_tolerance_secs {
                self.auth.signature_tolerance_secs = signature_tolerance_secs;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(enabled) = rate_limit.enabled {
                self.rate_limit.enabled = enabled;
            }
            if let Some(adaptive) = rate_limit.adaptive {
                self.rate_limit.adaptive = adaptive;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BRIDGEWAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BRIDGEWAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BRIDGEWAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BRIDGEWAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BRIDGEWAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BRIDGEWAY_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = secret_value(value);
        }
        if let Some(value) = read_env("BRIDGEWAY_SLACK_BOT_TOKEN") {
            self.slack.bot_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("BRIDGEWAY_NOTION_WEBHOOK_SECRET") {
            self.notion.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("BRIDGEWAY_NOTION_INTEGRATION_TOKEN") {
            self.notion.integration_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("BRIDGEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BRIDGEWAY_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("BRIDGEWAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BRIDGEWAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BRIDGEWAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("BRIDGEWAY_AUTH_LEGACY_OPEN_SCOPES") {
            self.auth.legacy_open_scopes =
                parse_bool("BRIDGEWAY_AUTH_LEGACY_OPEN_SCOPES", &value)?;
        }
        if let Some(value) = read_env("BRIDGEWAY_AUTH_DEFAULT_QUOTA_PER_HOUR") {
            self.auth.default_quota_per_hour =
                parse_u32("BRIDGEWAY_AUTH_DEFAULT_QUOTA_PER_HOUR", &value)?;
        }
        if let Some(value) = read_env("BRIDGEWAY_AUTH_SIGNATURE_TOLERANCE_SECS") {
            self.auth.signature_tolerance_secs =
                parse_i64("BRIDGEWAY_AUTH_SIGNATURE_TOLERANCE_SECS", &value)?;
        }

        if let Some(value) = read_env("BRIDGEWAY_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("BRIDGEWAY_RATE_LIMIT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("BRIDGEWAY_RATE_LIMIT_ADAPTIVE") {
            self.rate_limit.adaptive = parse_bool("BRIDGEWAY_RATE_LIMIT_ADAPTIVE", &value)?;
        }

        let log_level =
            read_env("BRIDGEWAY_LOGGING_LEVEL").or_else(|| read_env("BRIDGEWAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BRIDGEWAY_LOGGING_FORMAT").or_else(|| read_env("BRIDGEWAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(signing_secret);
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = Some(secret_value(bot_token));
        }
        if let Some(webhook_secret) = overrides.notion_webhook_secret {
            self.notion.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(legacy_open_scopes) = overrides.legacy_open_scopes {
            self.auth.legacy_open_scopes = legacy_open_scopes;
        }
        if let Some(enabled) = overrides.rate_limit_enabled {
            self.rate_limit.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_notion(&self.notion)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bridgeway.toml"), PathBuf::from("config/bridgeway.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let signing_secret = slack.signing_secret.expose_secret();
    if signing_secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required. Get it from https://api.slack.com/apps > \
             Your App > Basic Information > Signing Secret"
                .to_string(),
        ));
    }
    if signing_secret.starts_with("xoxb-") || signing_secret.starts_with("xapp-") {
        return Err(ConfigError::Validation(
            "slack.signing_secret looks like an OAuth token \
             (hint: use the signing secret, not the bot or app token)"
                .to_string(),
        ));
    }

    if let Some(bot_token) = &slack.bot_token {
        if !bot_token.expose_secret().starts_with("xoxb-") {
            return Err(ConfigError::Validation(
                "slack.bot_token must start with `xoxb-`. Get it from https://api.slack.com/apps"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_notion(notion: &NotionConfig) -> Result<(), ConfigError> {
    let blank_secret = notion
        .webhook_secret
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if blank_secret {
        return Err(ConfigError::Validation(
            "notion.webhook_secret must not be blank when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    if auth.default_quota_per_hour == 0 {
        return Err(ConfigError::Validation(
            "auth.default_quota_per_hour must be greater than zero".to_string(),
        ));
    }

    if auth.signature_tolerance_secs <= 0 || auth.signature_tolerance_secs > 3600 {
        return Err(ConfigError::Validation(
            "auth.signature_tolerance_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    notion: Option<NotionPatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    rate_limit: Option<RateLimitPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    signing_secret: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotionPatch {
    webhook_secret: Option<String>,
    integration_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    legacy_open_scopes: Option<bool>,
    default_quota_per_hour: Option<u32>,
    signature_tolerance_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    enabled: Option<bool>,
    adaptive: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
