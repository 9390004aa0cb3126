use std::sync::Arc;

use concierge_core::{DenyAll, ExportProtocol};
use serde_json::Value;

use crate::catalog::demo_registry;
use crate::commands::CommandResult;

const COMMAND: &str = "tools";

/// Prints the demo catalog in a model tool-calling format.
pub fn run(protocol: &str) -> CommandResult {
    let protocol = match protocol.parse::<ExportProtocol>() {
        Ok(protocol) => protocol,
        Err(message) => return CommandResult::failure(COMMAND, "invalid_argument", message, 2),
    };
    let registry = match demo_registry(Arc::new(DenyAll)) {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure(COMMAND, "registry", error.to_string(), 1),
    };

    let exported = registry.export(protocol);
    CommandResult::with_data(
        COMMAND,
        format!("{} tools exported", exported.len()),
        Some(Value::Array(exported)),
    )
}
