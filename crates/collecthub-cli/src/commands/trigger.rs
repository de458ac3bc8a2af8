//! Trigger inspection and cron preview commands.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use collecthub_core::config::scheduler::parse_utc_offset;
use collecthub_core::error::AppError;
use collecthub_worker::cron::CronExpr;
use collecthub_worker::manager::HISTORY_CLEANUP_TRIGGER;

/// Arguments for trigger commands
#[derive(Debug, Args)]
pub struct TriggerArgs {
    /// Trigger subcommand
    #[command(subcommand)]
    pub command: TriggerCommand,
}

/// Trigger subcommands
#[derive(Debug, Subcommand)]
pub enum TriggerCommand {
    /// Preview the next fire times of a cron expression
    Next {
        /// Five-field cron expression, e.g. "*/15 8-18 * * 1-5"
        expr: String,
        /// Number of fire times to show (1-1000)
        #[arg(
            short = 'n',
            long,
            default_value_t = 5,
            value_parser = clap::value_parser!(u16).range(1..=1000)
        )]
        count: u16,
        /// UTC offset to evaluate in (defaults to scheduler.timezone)
        #[arg(long, allow_hyphen_values = true)]
        tz: Option<String>,
    },
    /// List configured triggers with their next fire time
    List,
}

/// Fire time row for table output
#[derive(Debug, Serialize, Tabled)]
struct FireRow {
    /// Sequence number
    #[tabled(rename = "#")]
    index: usize,
    /// Fire time in the evaluation timezone
    local: String,
    /// Fire time in UTC
    utc: String,
}

/// Trigger row for table output
#[derive(Debug, Serialize, Tabled)]
struct TriggerRow {
    /// Trigger name
    name: String,
    /// Cron expression
    cron: String,
    /// Task type
    #[tabled(rename = "type")]
    task_type: String,
    /// Priority
    priority: i32,
    /// Next fire time
    next_fire: String,
}

/// Execute trigger commands
pub async fn execute(
    args: &TriggerArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        TriggerCommand::Next { expr, count, tz } => {
            let offset = match tz {
                Some(tz) => parse_utc_offset(tz)?,
                None => configured_offset(config_path),
            };
            let cron = CronExpr::parse(expr)?;
            let rows: Vec<FireRow> = cron
                .upcoming(Utc::now(), offset, usize::from(*count))?
                .into_iter()
                .enumerate()
                .map(|(i, t)| FireRow {
                    index: i + 1,
                    local: t.with_timezone(&offset).format("%Y-%m-%d %H:%M %:z").to_string(),
                    utc: t.to_rfc3339(),
                })
                .collect();
            output::print_list(&rows, format);
        }
        TriggerCommand::List => {
            let config = super::load_config(config_path)?;
            let offset = config.scheduler.timezone_offset()?;
            let now = Utc::now();

            let mut rows = vec![TriggerRow {
                name: HISTORY_CLEANUP_TRIGGER.to_string(),
                cron: config.scheduler.cleanup_cron.clone(),
                task_type: "history_cleanup".to_string(),
                priority: 0,
                next_fire: next_fire(&config.scheduler.cleanup_cron, now, offset),
            }];
            rows.extend(config.triggers.iter().map(|t| TriggerRow {
                name: t.name.clone(),
                cron: t.cron.clone(),
                task_type: t.task_type.clone(),
                priority: t.priority,
                next_fire: next_fire(&t.cron, now, offset),
            }));
            output::print_list(&rows, format);
        }
    }

    Ok(())
}

fn next_fire(expr: &str, now: DateTime<Utc>, offset: FixedOffset) -> String {
    match CronExpr::parse(expr).and_then(|c| c.next_after(now, offset)) {
        Ok(t) => t.with_timezone(&offset).format("%Y-%m-%d %H:%M %:z").to_string(),
        Err(e) => format!("invalid: {}", e.message),
    }
}

/// Timezone from the config file, falling back to UTC when it cannot be read.
fn configured_offset(config_path: &str) -> FixedOffset {
    super::load_config(config_path)
        .and_then(|c| c.scheduler.timezone_offset())
        .unwrap_or_else(|e| {
            output::print_warning(&format!("Using UTC: {}", e));
            Utc.fix()
        })
}
