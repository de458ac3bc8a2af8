//! Schema migrations for the `tasks` table.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

use collecthub_core::error::{AppError, ErrorKind};

/// Migrations embedded from the workspace `migrations/` directory.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Version of the newest embedded migration.
pub fn latest_version() -> Option<i64> {
    MIGRATOR.iter().map(|m| m.version).max()
}

/// Bring the task store schema up to [`latest_version`].
///
/// Already-applied migrations are skipped, so this is safe to call on every
/// server start.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    let target = latest_version().unwrap_or_default();
    info!(target_version = target, "Migrating task store schema");

    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Task store migration to version {target} failed: {e}"),
            e,
        )
    })?;

    info!(version = target, "Task store schema is current");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_migration_is_embedded() {
        assert_eq!(latest_version(), Some(1));
        let first = MIGRATOR.iter().next().unwrap();
        assert_eq!(first.description, "create tasks");
    }
}
