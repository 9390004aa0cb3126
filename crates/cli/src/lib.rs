pub mod catalog;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use concierge_core::config::{AppConfig, LoadOptions, LogFormat};

use crate::commands::chat::ChatOptions;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Talk to the natural-language dispatch engine, classify single messages, export the tool catalog and inspect configuration.",
    after_help = "Examples:\n  concierge chat --user alice --grant sales.order.create\n  concierge parse \"query all products\" --offline\n  concierge tools --protocol tool-use\n  concierge config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this TOML file")]
    config_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Interactive conversation over stdin/stdout against the demo catalog")]
    Chat {
        #[arg(long, default_value = "cli", help = "Session identifier")]
        session: String,
        #[arg(long, default_value = "operator", help = "Acting user identifier")]
        user: String,
        #[arg(long, help = "Bypass permission and approval gates")]
        privileged: bool,
        #[arg(long = "grant", value_name = "CODE", help = "Permission code granted to the user (repeatable)")]
        grants: Vec<String>,
        #[arg(long, help = "Skip the language model and use keyword classification only")]
        offline: bool,
    },
    #[command(about = "Classify one message and print the result as JSON")]
    Parse {
        text: String,
        #[arg(long, help = "Skip the language model and use keyword classification only")]
        offline: bool,
    },
    #[command(about = "Export the demo tool catalog for model tool calling")]
    Tools {
        #[arg(long, default_value = "function-calling", help = "function-calling | tool-use")]
        protocol: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
}

/// Logs go to stderr so command output on stdout stays machine readable.
fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded; keep the existing one.
    let _ = match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = commands::load_options(cli.config_file.clone());

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Chat { session, user, privileged, grants, offline } => {
            let chat = ChatOptions { session_id: session, user_id: user, privileged, grants, offline };
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            commands::chat::run(chat, options, stdin, tokio::io::stdout()).await
        }
        Command::Parse { text, offline } => commands::parse::run(&text, offline, options).await,
        Command::Tools { protocol } => commands::tools::run(&protocol),
        Command::Config => commands::CommandResult::text(commands::config::run(options)),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_repeated_grants() {
        let cli = Cli::try_parse_from([
            "concierge", "chat", "--user", "alice", "--grant", "a", "--grant", "b", "--offline",
        ])
        .expect("valid arguments");
        match cli.command {
            Command::Chat { user, grants, offline, privileged, .. } => {
                assert_eq!(user, "alice");
                assert_eq!(grants, vec!["a", "b"]);
                assert!(offline);
                assert!(!privileged);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_file_flag_is_global() {
        let cli = Cli::try_parse_from(["concierge", "tools", "--config-file", "custom.toml"])
            .expect("valid arguments");
        assert_eq!(cli.config_file.as_deref(), Some(std::path::Path::new("custom.toml")));
    }
}
