pub mod chat;
pub mod config;
pub mod parse;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use concierge_agent::{HttpLlmClient, LlmClient, UnavailableLlmClient};
use concierge_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::with_data(command, message, None)
    }

    pub fn with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub fn load_options(config_file: Option<PathBuf>) -> LoadOptions {
    LoadOptions { require_file: config_file.is_some(), config_path: config_file, ..LoadOptions::default() }
}

/// Loads config or renders the failure as the command's result.
pub fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(command, "config_validation", error.to_string(), 2)
    })
}

/// The configured model client, or the always-failing client when offline or
/// when the client cannot be built.
pub fn llm_client(config: &AppConfig, offline: bool) -> Arc<dyn LlmClient> {
    if offline {
        return Arc::new(UnavailableLlmClient);
    }
    match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            warn!(
                event_name = "cli.llm.unavailable",
                error = %error,
                "falling back to keyword classification"
            );
            Arc::new(UnavailableLlmClient)
        }
    }
}
