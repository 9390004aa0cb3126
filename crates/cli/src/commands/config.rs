use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use serde_json::Value as JsonValue;
use toml::Value;

const FIELDS: &[(&str, &str)] = &[
    ("llm.provider", "CONCIERGE_LLM_PROVIDER"),
    ("llm.model", "CONCIERGE_LLM_MODEL"),
    ("llm.base_url", "CONCIERGE_LLM_BASE_URL"),
    ("llm.api_key", "CONCIERGE_LLM_API_KEY"),
    ("llm.timeout_secs", "CONCIERGE_LLM_TIMEOUT_SECS"),
    ("llm.max_retries", "CONCIERGE_LLM_MAX_RETRIES"),
    ("cache.enabled", "CONCIERGE_CACHE_ENABLED"),
    ("cache.default_ttl_secs", "CONCIERGE_CACHE_DEFAULT_TTL_SECS"),
    ("sessions.idle_ttl_secs", "CONCIERGE_SESSIONS_IDLE_TTL_SECS"),
    ("sessions.sweep_interval_secs", "CONCIERGE_SESSIONS_SWEEP_INTERVAL_SECS"),
    ("monitor.slow_execution_secs", "CONCIERGE_MONITOR_SLOW_EXECUTION_SECS"),
    ("monitor.very_slow_execution_secs", "CONCIERGE_MONITOR_VERY_SLOW_EXECUTION_SECS"),
    ("monitor.min_success_rate_pct", "CONCIERGE_MONITOR_MIN_SUCCESS_RATE_PCT"),
    ("logging.level", "CONCIERGE_LOGGING_LEVEL"),
    ("logging.format", "CONCIERGE_LOGGING_FORMAT"),
];

/// Effective configuration, one line per field with the layer it came from.
/// Secrets are never printed.
pub fn run(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let redacted = config.redacted();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key) in FIELDS {
        let value = lookup(&redacted, key_path).map(render_value).unwrap_or_else(|| "<unset>".to_string());
        let source =
            field_source(key_path, Some(*env_key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then_some(path);
    }

    let root = PathBuf::from("concierge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/concierge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn lookup<'a>(root: &'a JsonValue, key_path: &str) -> Option<&'a JsonValue> {
    key_path.split('.').try_fold(root, |current, key| current.get(key))
}

fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "<unset>".to_string(),
        JsonValue::String(text) if text.is_empty() => "<empty>".to_string(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
