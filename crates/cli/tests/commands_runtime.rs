use std::env;
use std::fs;
use std::future::Future;
use std::sync::{Mutex, OnceLock};

use concierge_cli::commands::chat::ChatOptions;
use concierge_cli::commands::{self, chat, config, parse, tools};
use concierge_core::config::LoadOptions;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn tools_exports_function_calling_catalog() {
    let result = tools::run("function-calling");
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "tools");
    assert_eq!(payload["status"], "ok");
    let exported = payload["data"].as_array().expect("data should be an array");
    assert_eq!(exported.len(), 8);
    assert!(exported.iter().all(|tool| tool["type"] == "function"));
}

#[test]
fn tools_exports_tool_use_catalog() {
    let result = tools::run("tool-use");
    let payload = parse_payload(&result.output);
    let first = &payload["data"][0];
    assert!(first.get("input_schema").is_some());
    assert!(first.get("type").is_none());
}

#[test]
fn tools_rejects_unknown_protocol() {
    let result = tools::run("smoke-signals");
    assert_eq!(result.exit_code, 2);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "invalid_argument");
}

#[test]
fn parse_offline_uses_keyword_fallback() {
    with_env(&[], || {
        let result = block_on(parse::run("create order, 100 units, laptop", true, LoadOptions::default()));
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["intent"], "create_order");
        assert_eq!(payload["data"]["entities"]["quantity"], 100);
        assert_eq!(payload["data"]["source"], "fallback");
    });
}

#[test]
fn parse_returns_config_failure_for_invalid_env() {
    with_env(&[("CONCIERGE_LLM_TIMEOUT_SECS", "0")], || {
        let result = block_on(parse::run("query all products", true, LoadOptions::default()));
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "parse");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn chat_completes_an_order_dialogue() {
    with_env(&[], || {
        let input = "create order, 100 units\ncustomer is Globex and product is laptop\nconfirm\n";
        let options = chat_options(vec!["sales.order.create".to_string()]);
        let mut transcript = Vec::new();

        let result =
            block_on(chat::run(options, LoadOptions::default(), input.as_bytes(), &mut transcript));
        assert_eq!(result.exit_code, 0);
        assert_eq!(parse_payload(&result.output)["message"], "3 messages processed");

        let transcript = String::from_utf8(transcript).expect("utf-8 transcript");
        let replies: Vec<&str> = transcript.lines().filter(|line| line.starts_with("assistant> ")).collect();
        assert_eq!(replies.len(), 3);
        assert!(replies[0].contains("I need the following information"));
        assert!(transcript.contains("Created order SO2025010001 for Globex (100 x laptop)."));
    });
}

#[test]
fn chat_without_permission_reports_failure() {
    with_env(&[], || {
        let input = "query order SO2025010001\nyes\n/quit\nignored\n";
        let mut transcript = Vec::new();

        let result = block_on(chat::run(
            chat_options(Vec::new()),
            LoadOptions::default(),
            input.as_bytes(),
            &mut transcript,
        ));
        assert_eq!(parse_payload(&result.output)["message"], "2 messages processed");

        let transcript = String::from_utf8(transcript).expect("utf-8 transcript");
        assert!(transcript.contains("Operation failed"));
    });
}

#[test]
fn chat_reset_starts_a_new_dialogue() {
    with_env(&[], || {
        let input = "query all products\n/reset\n/reset\n";
        let mut transcript = Vec::new();

        block_on(chat::run(chat_options(Vec::new()), LoadOptions::default(), input.as_bytes(), &mut transcript));

        let transcript = String::from_utf8(transcript).expect("utf-8 transcript");
        assert!(transcript.contains("assistant> Session reset."));
        assert!(transcript.contains("assistant> No active session to reset."));
    });
}

#[test]
fn config_redacts_api_key_and_names_env_source() {
    with_env(&[("CONCIERGE_LLM_API_KEY", "sk-very-secret")], || {
        let output = config::run(LoadOptions::default());
        assert!(!output.contains("sk-very-secret"));
        assert!(output.contains("- llm.api_key = [redacted] (source: env (CONCIERGE_LLM_API_KEY))"));
        assert!(output.contains("- cache.default_ttl_secs = 300 (source: default)"));
    });
}

#[test]
fn config_attributes_values_to_explicit_file() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[cache]\ndefault_ttl_secs = 42\n").expect("write config");

        let output = config::run(commands::load_options(Some(path.clone())));
        let expected = format!("- cache.default_ttl_secs = 42 (source: file ({}))", path.display());
        assert!(output.contains(&expected), "unexpected output:\n{output}");
    });
}

fn chat_options(grants: Vec<String>) -> ChatOptions {
    ChatOptions {
        session_id: "test".to_string(),
        user_id: "alice".to_string(),
        privileged: false,
        grants,
        offline: true,
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime should build")
        .block_on(future)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CONCIERGE_LLM_PROVIDER",
        "CONCIERGE_LLM_API_KEY",
        "CONCIERGE_LLM_BASE_URL",
        "CONCIERGE_LLM_MODEL",
        "CONCIERGE_LLM_TIMEOUT_SECS",
        "CONCIERGE_LLM_MAX_RETRIES",
        "CONCIERGE_CACHE_ENABLED",
        "CONCIERGE_CACHE_DEFAULT_TTL_SECS",
        "CONCIERGE_SESSIONS_IDLE_TTL_SECS",
        "CONCIERGE_SESSIONS_SWEEP_INTERVAL_SECS",
        "CONCIERGE_MONITOR_SLOW_EXECUTION_SECS",
        "CONCIERGE_MONITOR_VERY_SLOW_EXECUTION_SECS",
        "CONCIERGE_MONITOR_MIN_SUCCESS_RATE_PCT",
        "CONCIERGE_LOGGING_LEVEL",
        "CONCIERGE_LOGGING_FORMAT",
        "CONCIERGE_LOG_LEVEL",
        "CONCIERGE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
