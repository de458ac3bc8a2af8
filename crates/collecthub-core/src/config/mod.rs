//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod collector;
pub mod database;
pub mod logging;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use self::collector::CollectorConfig;
pub use self::database::DatabaseConfig;
pub use self::logging::LoggingConfig;
pub use self::scheduler::SchedulerConfig;

use crate::error::AppError;

/// Prefix for environment variable overrides (`COLLECTHUB__SCHEDULER__MAX_CONCURRENT_TASKS`).
const ENV_PREFIX: &str = "COLLECTHUB";

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Task store connection settings.
    pub database: DatabaseConfig,
    /// Scheduling engine settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// HTTP collector settings.
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Recurring triggers registered when the server boots.
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

/// A recurring trigger declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Unique trigger name.
    pub name: String,
    /// Five-field cron expression.
    pub cron: String,
    /// Task type spawned on each firing (e.g. `"collect_articles"`).
    pub task_type: String,
    /// Task configuration copied into every spawned task.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    /// Priority of spawned tasks.
    #[serde(default)]
    pub priority: i32,
    /// Retry budget of spawned tasks (engine default when absent).
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// `path` is the base file (extension optional). A sibling overlay named
    /// after `env` is merged on top when present, followed by
    /// `COLLECTHUB__*` environment variables.
    pub fn load(path: &str, env: Option<&str>) -> Result<Self, AppError> {
        let base = path.trim_end_matches(".toml");
        let mut builder =
            config::Config::builder().add_source(config::File::with_name(base).required(false));

        if let Some(env) = env {
            let overlay = match base.rsplit_once('/') {
                Some((dir, _)) => format!("{dir}/{env}"),
                None => env.to_string(),
            };
            builder = builder.add_source(config::File::with_name(&overlay).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), AppError> {
        self.database.validate()?;
        self.scheduler.validate()?;

        let mut seen = std::collections::HashSet::new();
        for trigger in &self.triggers {
            if !seen.insert(trigger.name.as_str()) {
                return Err(AppError::configuration(format!(
                    "duplicate trigger name '{}'",
                    trigger.name
                )));
            }
        }
        Ok(())
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
