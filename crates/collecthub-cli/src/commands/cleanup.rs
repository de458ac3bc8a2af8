//! History purge command.

use chrono::Utc;
use clap::Args;

use crate::output::{self, OutputFormat};
use collecthub_core::error::AppError;
use collecthub_worker::jobs::{history_cutoff, purge_history};

/// Arguments for the cleanup command
#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Retention in days (defaults to scheduler.retention_days)
    #[arg(short, long)]
    pub days: Option<i64>,
}

/// Delete completed and failed tasks older than the retention window
pub async fn execute(
    args: &CleanupArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let retention_days = args.days.unwrap_or(config.scheduler.retention_days);
    history_cutoff(retention_days, Utc::now())?;
    let store = super::create_store(&config).await?;

    let deleted = purge_history(store.as_ref(), retention_days, Utc::now()).await?;

    match format {
        OutputFormat::Json => output::print_json(
            &serde_json::json!({ "deleted": deleted, "retention_days": retention_days }),
            "{}",
        ),
        OutputFormat::Table => output::print_success(&format!(
            "Deleted {} task(s) older than {} days",
            deleted, retention_days
        )),
    }
    Ok(())
}
