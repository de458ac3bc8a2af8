//! `collecthub`: operator CLI for the task store and trigger schedules.
//!
//! Results go to stdout (table or JSON); logs go to stderr so `-f json`
//! output stays machine-readable.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .init();

    if let Err(e) = cli.execute().await {
        tracing::debug!(kind = ?e.kind, "Command failed");
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}
