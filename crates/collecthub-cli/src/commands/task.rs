//! Task management CLI commands.

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::output::{self, OutputFormat};
use collecthub_core::error::AppError;
use collecthub_core::types::PageRequest;
use collecthub_database::TaskStore;
use collecthub_entity::task::{Task, TaskKind, TaskStatus};
use collecthub_worker::TaskRequest;
use collecthub_worker::retry;

/// Arguments for task commands
#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Task subcommand
    #[command(subcommand)]
    pub command: TaskCommand,
}

/// Task subcommands
#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Create a one-off task
    Create {
        /// Task name
        name: String,
        /// Task type (collect_articles, history_cleanup)
        #[arg(short = 't', long = "type")]
        task_type: String,
        /// JSON configuration object
        #[arg(long, default_value = "{}")]
        config: String,
        /// Priority (higher runs first)
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        /// Retry budget (defaults to scheduler.default_max_retries)
        #[arg(long)]
        max_retries: Option<i32>,
        /// Earliest run time, RFC 3339
        #[arg(long)]
        run_at: Option<DateTime<Utc>>,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<TaskStatus>,
        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: u64,
        /// Page size
        #[arg(long, default_value_t = 20)]
        size: u64,
    },
    /// Show one task
    Show {
        /// Task ID
        id: Uuid,
    },
    /// Cancel a pending or failed task
    Cancel {
        /// Task ID
        id: Uuid,
    },
    /// Make a task due now
    Retry {
        /// Task ID
        id: Uuid,
    },
    /// Task counts per status
    Stats,
}

/// Task display row for table output
#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    /// Task ID
    id: String,
    /// Name
    name: String,
    /// Task type
    #[tabled(rename = "type")]
    task_type: String,
    /// Status
    status: String,
    /// Priority
    priority: i32,
    /// Retries used / budget
    retries: String,
    /// Next run time
    next_run: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            name: task.name.clone(),
            task_type: task.task_type.to_string(),
            status: task.status.to_string(),
            priority: task.priority,
            retries: format!("{}/{}", task.retry_count, task.max_retries),
            next_run: task
                .next_run_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Status count row for table output
#[derive(Debug, Serialize, Tabled)]
struct CountRow {
    /// Status
    status: String,
    /// Number of tasks
    count: u64,
}

/// Execute task commands
pub async fn execute(
    args: &TaskArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let store = super::create_store(&config).await?;

    match &args.command {
        TaskCommand::Create {
            name,
            task_type,
            config: task_config,
            priority,
            max_retries,
            run_at,
        } => {
            let kind: TaskKind = task_type.parse()?;
            let task_config: serde_json::Value = serde_json::from_str(task_config)
                .map_err(|e| AppError::validation(format!("Invalid JSON config: {}", e)))?;

            let request = TaskRequest {
                name: name.clone(),
                task_type: task_type.clone(),
                config: task_config,
                priority: *priority,
                max_retries: *max_retries,
                run_at: *run_at,
            };
            let data = request.into_create(kind, config.scheduler.default_max_retries)?;
            let task = store.insert(&data).await?;

            output::print_success(&format!("Task '{}' created (id: {})", task.name, task.id));
        }
        TaskCommand::List { status, page, size } => {
            let page = store.list(*status, &PageRequest::new(*page, *size)).await?;
            let rows: Vec<TaskRow> = page.items.iter().map(TaskRow::from).collect();
            output::print_list(&rows, format);
            if format == OutputFormat::Table {
                println!(
                    "Page {}/{} ({} tasks)",
                    page.page,
                    page.total_pages,
                    page.total_items
                );
            }
        }
        TaskCommand::Show { id } => {
            let task = store
                .find_by_id(*id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Task {} not found", id)))?;
            print_task(&task, format);
        }
        TaskCommand::Cancel { id } => {
            let task = retry::cancel(store.as_ref(), *id).await?;
            output::print_success(&format!("Task '{}' cancelled", task.name));
        }
        TaskCommand::Retry { id } => {
            let task = retry::retry_now(store.as_ref(), *id, Utc::now()).await?;
            output::print_success(&format!(
                "Task '{}' requeued (retries used: {}/{})",
                task.name, task.retry_count, task.max_retries
            ));
        }
        TaskCommand::Stats => {
            let counts = store.count_by_status().await?;
            match format {
                OutputFormat::Json => output::print_json(&counts, "{}"),
                OutputFormat::Table => {
                    let mut rows: Vec<CountRow> = TaskStatus::ALL
                        .iter()
                        .map(|status| CountRow {
                            status: status.to_string(),
                            count: counts.get(*status),
                        })
                        .collect();
                    rows.push(CountRow {
                        status: "total".to_string(),
                        count: counts.total(),
                    });
                    output::print_list(&rows, format);
                }
            }
        }
    }

    Ok(())
}

fn print_task(task: &Task, format: OutputFormat) {
    if format == OutputFormat::Json {
        output::print_json(task, "{}");
        return;
    }

    let time = |t: Option<DateTime<Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };

    println!("Task {}:", task.id);
    output::print_kv("Name", &task.name);
    output::print_kv("Type", task.task_type.as_str());
    output::print_kv("Status", task.status.as_str());
    output::print_kv("Priority", &task.priority.to_string());
    output::print_kv(
        "Retries",
        &format!("{}/{}", task.retry_count, task.max_retries),
    );
    output::print_kv("Trigger", task.trigger_name.as_deref().unwrap_or("-"));
    output::print_kv("Next run", &time(task.next_run_time));
    output::print_kv("Created", &task.created_at.to_rfc3339());
    output::print_kv("Started", &time(task.started_at));
    output::print_kv("Ended", &time(task.ended_at));
    output::print_kv("Config", &task.config.to_string());
    if let Some(result) = &task.result {
        output::print_kv("Result", &result.to_string());
    }
    if let Some(error) = &task.error_message {
        output::print_kv("Error", error);
    }
}
