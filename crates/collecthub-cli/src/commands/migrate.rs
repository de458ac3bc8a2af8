//! Database migration command.

use crate::output;
use collecthub_core::error::AppError;
use collecthub_database::DatabasePool;
use collecthub_database::migration;

/// Apply all pending migrations
pub async fn execute(config_path: &str) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let pool = DatabasePool::connect(&config.database).await?;

    let result = migration::run_migrations(pool.pool()).await;
    pool.close().await;
    result?;

    output::print_success(&format!(
        "Task store schema at version {}",
        migration::latest_version().unwrap_or_default()
    ));
    Ok(())
}
