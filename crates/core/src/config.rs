use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::waitlist::MAX_OFFER_HOURS;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub payments: PaymentsConfig,
    pub notifications: NotificationsConfig,
    pub waitlist: WaitlistConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    /// Shared secret for the `x-enrolla-signature` HMAC on provider callbacks.
    pub webhook_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub from_address: String,
}

#[derive(Clone, Debug)]
pub struct WaitlistConfig {
    pub default_offer_hours: u32,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub number_width: usize,
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
    pub server_port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub default_offer_hours: Option<u32>,
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
                url: "sqlite://enrolla.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            payments: PaymentsConfig { webhook_secret: None },
            notifications: NotificationsConfig {
                enabled: false,
                endpoint: None,
                api_key: None,
                timeout_secs: 10,
                from_address: "no-reply@enrolla.local".to_string(),
            },
            waitlist: WaitlistConfig { default_offer_hours: 48 },
            billing: BillingConfig {
                invoice_prefix: "INV".to_string(),
                credit_note_prefix: "CN".to_string(),
                number_width: 4,
            },
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("enrolla.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Effective configuration with secrets replaced by `<redacted>`.
    pub fn redacted_summary(&self) -> serde_json::Value {
        let redact = |secret: &Option<SecretString>| {
            if secret.is_some() {
                "<redacted>"
            } else {
                "<unset>"
            }
        };
        serde_json::json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "server": {
                "bind_address": self.server.bind_address,
                "port": self.server.port,
                "graceful_shutdown_secs": self.server.graceful_shutdown_secs,
            },
            "payments": { "webhook_secret": redact(&self.payments.webhook_secret) },
            "notifications": {
                "enabled": self.notifications.enabled,
                "endpoint": self.notifications.endpoint,
                "api_key": redact(&self.notifications.api_key),
                "timeout_secs": self.notifications.timeout_secs,
                "from_address": self.notifications.from_address,
            },
            "waitlist": { "default_offer_hours": self.waitlist.default_offer_hours },
            "billing": {
                "invoice_prefix": self.billing.invoice_prefix,
                "credit_note_prefix": self.billing.credit_note_prefix,
                "number_width": self.billing.number_width,
            },
            "logging": { "level": self.logging.level, "format": self.logging.format },
        })
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

        if let Some(payments) = patch.payments {
            if let Some(webhook_secret) = payments.webhook_secret {
                self.payments.webhook_secret = Some(secret_value(webhook_secret));
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(enabled) = notifications.enabled {
                self.notifications.enabled = enabled;
            }
            if let Some(endpoint) = notifications.endpoint {
                self.notifications.endpoint = Some(endpoint);
            }
            if let Some(api_key) = notifications.api_key {
                self.notifications.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = notifications.timeout_secs {
                self.notifications.timeout_secs = timeout_secs;
            }
            if let Some(from_address) = notifications.from_address {
                self.notifications.from_address = from_address;
            }
        }

        if let Some(waitlist) = patch.waitlist {
            if let Some(default_offer_hours) = waitlist.default_offer_hours {
                self.waitlist.default_offer_hours = default_offer_hours;
            }
        }

        if let Some(billing) = patch.billing {
            if let Some(invoice_prefix) = billing.invoice_prefix {
                self.billing.invoice_prefix = invoice_prefix;
            }
            if let Some(credit_note_prefix) = billing.credit_note_prefix {
                self.billing.credit_note_prefix = credit_note_prefix;
            }
            if let Some(number_width) = billing.number_width {
                self.billing.number_width = number_width;
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
        if let Some(value) = read_env("ENROLLA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ENROLLA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("ENROLLA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ENROLLA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ENROLLA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ENROLLA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ENROLLA_SERVER_PORT") {
            self.server.port = parse_u16("ENROLLA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ENROLLA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ENROLLA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("ENROLLA_PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("ENROLLA_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_bool("ENROLLA_NOTIFICATIONS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ENROLLA_NOTIFICATIONS_ENDPOINT") {
            self.notifications.endpoint = Some(value);
        }
        if let Some(value) = read_env("ENROLLA_NOTIFICATIONS_API_KEY") {
            self.notifications.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("ENROLLA_NOTIFICATIONS_TIMEOUT_SECS") {
            self.notifications.timeout_secs =
                parse_u64("ENROLLA_NOTIFICATIONS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ENROLLA_NOTIFICATIONS_FROM_ADDRESS") {
            self.notifications.from_address = value;
        }

        if let Some(value) = read_env("ENROLLA_WAITLIST_DEFAULT_OFFER_HOURS") {
            self.waitlist.default_offer_hours =
                parse_u32("ENROLLA_WAITLIST_DEFAULT_OFFER_HOURS", &value)?;
        }

        if let Some(value) = read_env("ENROLLA_BILLING_INVOICE_PREFIX") {
            self.billing.invoice_prefix = value;
        }
        if let Some(value) = read_env("ENROLLA_BILLING_CREDIT_NOTE_PREFIX") {
            self.billing.credit_note_prefix = value;
        }
        if let Some(value) = read_env("ENROLLA_BILLING_NUMBER_WIDTH") {
            self.billing.number_width = parse_u32("ENROLLA_BILLING_NUMBER_WIDTH", &value)? as usize;
        }

        let log_level = read_env("ENROLLA_LOGGING_LEVEL").or_else(|| read_env("ENROLLA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ENROLLA_LOGGING_FORMAT").or_else(|| read_env("ENROLLA_LOG_FORMAT"));
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(webhook_secret) = overrides.webhook_secret {
            self.payments.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(enabled) = overrides.notifications_enabled {
            self.notifications.enabled = enabled;
        }
        if let Some(hours) = overrides.default_offer_hours {
            self.waitlist.default_offer_hours = hours;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_payments(&self.payments)?;
        validate_notifications(&self.notifications)?;
        validate_waitlist(&self.waitlist)?;
        validate_billing(&self.billing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("enrolla.toml"), PathBuf::from("config/enrolla.toml")]
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

fn validate_payments(payments: &PaymentsConfig) -> Result<(), ConfigError> {
    if let Some(secret) = &payments.webhook_secret {
        if secret.expose_secret().trim().len() < 16 {
            return Err(ConfigError::Validation(
                "payments.webhook_secret must be at least 16 characters; copy it from the payment provider dashboard".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_notifications(notifications: &NotificationsConfig) -> Result<(), ConfigError> {
    if notifications.timeout_secs == 0 || notifications.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifications.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if !notifications.enabled {
        return Ok(());
    }

    match notifications.endpoint.as_deref().map(str::trim) {
        None | Some("") => Err(ConfigError::Validation(
            "notifications.enabled is true but notifications.endpoint is not set".to_string(),
        )),
        Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
            Err(ConfigError::Validation(
                "notifications.endpoint must start with http:// or https://".to_string(),
            ))
        }
        Some(_) if !notifications.from_address.contains('@') => Err(ConfigError::Validation(
            "notifications.from_address must be an email address".to_string(),
        )),
        Some(_) => Ok(()),
    }
}

fn validate_waitlist(waitlist: &WaitlistConfig) -> Result<(), ConfigError> {
    if waitlist.default_offer_hours == 0 || waitlist.default_offer_hours > MAX_OFFER_HOURS {
        return Err(ConfigError::Validation(format!(
            "waitlist.default_offer_hours must be in range 1..={MAX_OFFER_HOURS}"
        )));
    }
    Ok(())
}

fn validate_billing(billing: &BillingConfig) -> Result<(), ConfigError> {
    for (key, prefix) in [
        ("billing.invoice_prefix", &billing.invoice_prefix),
        ("billing.credit_note_prefix", &billing.credit_note_prefix),
    ] {
        let valid = !prefix.is_empty()
            && prefix.len() <= 12
            && prefix.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !valid {
            return Err(ConfigError::Validation(format!(
                "{key} must be 1..=12 ASCII letters or digits"
            )));
        }
    }

    if billing.invoice_prefix.eq_ignore_ascii_case(&billing.credit_note_prefix) {
        return Err(ConfigError::Validation(
            "billing.invoice_prefix and billing.credit_note_prefix must differ".to_string(),
        ));
    }

    if billing.number_width == 0 || billing.number_width > 10 {
        return Err(ConfigError::Validation(
            "billing.number_width must be in range 1..=10".to_string(),
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    payments: Option<PaymentsPatch>,
    notifications: Option<NotificationsPatch>,
    waitlist: Option<WaitlistPatch>,
    billing: Option<BillingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentsPatch {
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    from_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WaitlistPatch {
    default_offer_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingPatch {
    invoice_prefix: Option<String>,
    credit_note_prefix: Option<String>,
    number_width: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
