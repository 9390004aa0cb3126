use concierge_agent::IntentExtractor;
use concierge_core::config::LoadOptions;

use crate::commands::{llm_client, load_config, CommandResult};

const COMMAND: &str = "parse";

/// Classifies one message and prints the classification.
pub async fn run(text: &str, offline: bool, options: LoadOptions) -> CommandResult {
    if text.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_argument", "text must not be empty", 2);
    }
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let extractor = IntentExtractor::new(llm_client(&config, offline), config.llm.timeout());
    let classification = extractor.parse(text).await;

    match serde_json::to_value(&classification) {
        Ok(data) => CommandResult::with_data(
            COMMAND,
            format!("classified as {}", classification.intent.as_tag()),
            Some(data),
        ),
        Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
    }
}
