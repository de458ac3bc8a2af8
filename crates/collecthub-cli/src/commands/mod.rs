//! CLI command definitions and dispatch.

pub mod cleanup;
pub mod config;
pub mod migrate;
pub mod task;
pub mod trigger;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use collecthub_core::config::AppConfig;
use collecthub_core::error::AppError;
use collecthub_database::DatabasePool;
use collecthub_database::repositories::TaskRepository;

/// CollectHub: scheduled content collection
#[derive(Debug, Parser)]
#[command(name = "collecthub", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Log engine and store activity to stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Task management
    Task(task::TaskArgs),
    /// Trigger inspection and cron preview
    Trigger(trigger::TriggerArgs),
    /// Purge old completed and failed tasks
    Cleanup(cleanup::CleanupArgs),
    /// Apply database migrations
    Migrate,
    /// Configuration management
    Config(config::ConfigArgs),
}

impl Cli {
    /// Log filter for the requested verbosity; `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "warn,collecthub=info,collecthub_worker=info,collecthub_database=info",
            _ => "info,collecthub=debug,collecthub_worker=debug,collecthub_database=debug",
        }
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Task(args) => task::execute(args, &self.config, self.format).await,
            Commands::Trigger(args) => trigger::execute(args, &self.config, self.format).await,
            Commands::Cleanup(args) => cleanup::execute(args, &self.config, self.format).await,
            Commands::Migrate => migrate::execute(&self.config).await,
            Commands::Config(args) => config::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    let env = std::env::var("COLLECTHUB_ENV").ok();
    AppConfig::load(config_path, env.as_deref())
}

/// Helper: connect to the task store described by the config
pub async fn create_store(config: &AppConfig) -> Result<Arc<TaskRepository>, AppError> {
    let pool = DatabasePool::connect(&config.database).await?;
    Ok(Arc::new(TaskRepository::new(pool.pool().clone())))
}
