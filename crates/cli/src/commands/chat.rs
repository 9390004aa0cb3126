use std::sync::Arc;

use concierge_agent::AgentRuntime;
use concierge_core::config::LoadOptions;
use concierge_core::{Principal, StaticPermissions, TracingAuditSink};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::catalog::demo_registry;
use crate::commands::{llm_client, load_config, CommandResult};

const COMMAND: &str = "chat";
const QUIT: &str = "/quit";
const RESET: &str = "/reset";

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub session_id: String,
    pub user_id: String,
    pub privileged: bool,
    pub grants: Vec<String>,
    pub offline: bool,
}

/// Interactive loop: one reply per input line until EOF or `/quit`.
/// `/reset` drops the current session and starts over.
pub async fn run<R, W>(options: ChatOptions, load: LoadOptions, input: R, mut output: W) -> CommandResult
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let config = match load_config(COMMAND, load) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let permissions = StaticPermissions::new().grant_all(options.user_id.clone(), options.grants.clone());
    let registry = match demo_registry(Arc::new(permissions)) {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure(COMMAND, "registry", error.to_string(), 1),
    };
    let llm = llm_client(&config, options.offline);
    let runtime = AgentRuntime::new(config, Arc::new(registry), Arc::new(TracingAuditSink), llm);
    let sweeper = runtime.spawn_session_sweeper();

    let principal = if options.privileged {
        Principal::privileged(options.user_id.clone())
    } else {
        Principal::user(options.user_id.clone())
    };

    let mut lines = input.lines();
    let mut processed = 0usize;
    let outcome = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(error) => break Err(format!("failed to read input: {error}")),
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == QUIT {
            break Ok(());
        }

        let reply = if text == RESET {
            match runtime.reset(&options.session_id).await {
                Ok(()) => "Session reset.".to_string(),
                Err(_) => "No active session to reset.".to_string(),
            }
        } else {
            processed += 1;
            runtime.process_message(&options.session_id, &principal, text).await.message
        };

        if let Err(error) = write_reply(&mut output, &reply).await {
            break Err(format!("failed to write reply: {error}"));
        }
    };
    sweeper.abort();

    match outcome {
        Ok(()) => CommandResult::success(COMMAND, format!("{processed} messages processed")),
        Err(message) => CommandResult::failure(COMMAND, "io", message, 1),
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &str) -> std::io::Result<()> {
    output.write_all(format!("assistant> {reply}\n").as_bytes()).await?;
    output.flush().await
}
