//! Configuration management CLI commands.

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use collecthub_core::error::AppError;
use collecthub_database::connection::redact_url;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

/// Execute config commands
pub async fn execute(
    args: &ConfigArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => {
            let mut config = super::load_config(config_path)?;
            config.database.url = redact_url(&config.database.url);
            match format {
                OutputFormat::Json => output::print_json(&config, "{}"),
                OutputFormat::Table => {
                    let scheduler = &config.scheduler;
                    println!("Database:");
                    output::print_kv("URL", &config.database.url);
                    output::print_kv("Max connections", &config.database.max_connections.to_string());
                    println!("Scheduler:");
                    output::print_kv("Enabled", &scheduler.enabled.to_string());
                    output::print_kv("Poll interval (s)", &scheduler.poll_interval_seconds.to_string());
                    output::print_kv("Max concurrent", &scheduler.max_concurrent_tasks.to_string());
                    output::print_kv("Default max retries", &scheduler.default_max_retries.to_string());
                    output::print_kv("Retry base delay (s)", &scheduler.retry_base_delay_seconds.to_string());
                    output::print_kv("Cleanup cron", &scheduler.cleanup_cron);
                    output::print_kv("Retention (days)", &scheduler.retention_days.to_string());
                    output::print_kv("Timezone", &scheduler.timezone);
                    println!("Collector:");
                    output::print_kv("User agent", &config.collector.user_agent);
                    output::print_kv("Request timeout (s)", &config.collector.request_timeout_seconds.to_string());
                    output::print_kv("Delay (ms)", &config.collector.delay_between_requests_ms.to_string());
                    output::print_kv("Max items per run", &config.collector.max_items_per_run.to_string());
                    println!("Logging:");
                    output::print_kv("Level", &config.logging.level);
                    output::print_kv("Format", &config.logging.format);
                    output::print_kv("Triggers", &config.triggers.len().to_string());
                }
            }
        }
        ConfigCommand::Validate => match super::load_config(config_path) {
            Ok(config) => {
                output::print_success(&format!("Configuration '{}' is valid", config_path));
                output::print_kv("Database", &redact_url(&config.database.url));
                output::print_kv("Triggers", &config.triggers.len().to_string());
            }
            Err(e) => {
                output::print_error(&format!("Configuration invalid: {}", e));
                return Err(e);
            }
        },
    }

    Ok(())
}
