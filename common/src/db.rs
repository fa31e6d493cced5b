use std::time::Duration;

use sqlx::PgPool;
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::DatabaseConfig;

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.url)
        .await?;

    info!(max_connections = config.max_connections, "Connected to database");
    Ok(pool)
}

/// Applies the schema under `migrations/`.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

/// Outcome of a read-modify-write on one row, performed under a row lock.
#[derive(Debug, Clone, PartialEq)]
pub enum Updated<T> {
    /// No row with that id.
    Missing,
    /// The requested values match the stored row; nothing was written.
    Unchanged(T),
    Changed { previous: T, current: T },
}
