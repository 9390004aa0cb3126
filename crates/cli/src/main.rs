use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    concierge_cli::run().await
}
