use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use enrolla_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Every reported key with the environment variable that overrides it.
const FIELDS: &[(&str, &str)] = &[
    ("database.url", "ENROLLA_DATABASE_URL"),
    ("database.max_connections", "ENROLLA_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "ENROLLA_DATABASE_TIMEOUT_SECS"),
    ("server.bind_address", "ENROLLA_SERVER_BIND_ADDRESS"),
    ("server.port", "ENROLLA_SERVER_PORT"),
    ("server.graceful_shutdown_secs", "ENROLLA_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("payments.webhook_secret", "ENROLLA_PAYMENTS_WEBHOOK_SECRET"),
    ("notifications.enabled", "ENROLLA_NOTIFICATIONS_ENABLED"),
    ("notifications.endpoint", "ENROLLA_NOTIFICATIONS_ENDPOINT"),
    ("notifications.api_key", "ENROLLA_NOTIFICATIONS_API_KEY"),
    ("notifications.timeout_secs", "ENROLLA_NOTIFICATIONS_TIMEOUT_SECS"),
    ("notifications.from_address", "ENROLLA_NOTIFICATIONS_FROM_ADDRESS"),
    ("waitlist.default_offer_hours", "ENROLLA_WAITLIST_DEFAULT_OFFER_HOURS"),
    ("billing.invoice_prefix", "ENROLLA_BILLING_INVOICE_PREFIX"),
    ("billing.credit_note_prefix", "ENROLLA_BILLING_CREDIT_NOTE_PREFIX"),
    ("billing.number_width", "ENROLLA_BILLING_NUMBER_WIDTH"),
    ("logging.level", "ENROLLA_LOGGING_LEVEL"),
    ("logging.format", "ENROLLA_LOGGING_FORMAT"),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let summary = config.redacted_summary();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in FIELDS {
        let value = lookup_json(&summary, key_path).map(render_value).unwrap_or_default();
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("enrolla.toml"), PathBuf::from("config/enrolla.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    // The short log aliases count as env overrides too.
    let alias = env_key.replace("_LOGGING_", "_LOG_");
    for key in [env_key, alias.as_str()] {
        if env::var(key).is_ok_and(|value| !value.trim().is_empty()) {
            return format!("env ({key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
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

fn lookup_json<'a>(root: &'a serde_json::Value, key_path: &str) -> Option<&'a serde_json::Value> {
    key_path.split('.').try_fold(root, |current, key| current.get(key))
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => "<unset>".to_string(),
        other => other.to_string(),
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
