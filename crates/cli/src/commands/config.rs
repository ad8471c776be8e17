use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use sarpras_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "SARPRAS_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "SARPRAS_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "SARPRAS_DATABASE_TIMEOUT_SECS",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "SARPRAS_SERVER_BIND_ADDRESS",
        ),
        ("server.port", config.server.port.to_string(), "SARPRAS_SERVER_PORT"),
        (
            "approval.token_ttl_hours",
            config.approval.token_ttl_hours.to_string(),
            "SARPRAS_APPROVAL_TOKEN_TTL_HOURS",
        ),
        (
            "approval.public_base_url",
            config.approval.public_base_url.clone(),
            "SARPRAS_APPROVAL_PUBLIC_BASE_URL",
        ),
        (
            "approval.display_timezone",
            config.approval.display_timezone.clone(),
            "SARPRAS_APPROVAL_DISPLAY_TIMEZONE",
        ),
        ("whatsapp.enabled", config.whatsapp.enabled.to_string(), "SARPRAS_WHATSAPP_ENABLED"),
        (
            "whatsapp.gateway_url",
            config.whatsapp.gateway_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "SARPRAS_WHATSAPP_GATEWAY_URL",
        ),
        (
            "whatsapp.api_token",
            redact_secret(config.whatsapp.api_token.as_ref()),
            "SARPRAS_WHATSAPP_API_TOKEN",
        ),
        (
            "whatsapp.max_retries",
            config.whatsapp.max_retries.to_string(),
            "SARPRAS_WHATSAPP_MAX_RETRIES",
        ),
        ("logging.level", config.logging.level.clone(), "SARPRAS_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "SARPRAS_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key, value, env_key)| render_line(key, &value, source(key, env_key))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("sarpras.toml"), PathBuf::from("config/sarpras.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|value| value.expose_secret().trim().len()) {
        None => "<unset>".to_string(),
        Some(0) => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
