use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::error::AppError;

/// Create a PostgreSQL connection pool.
///
/// Connections are established lazily on first acquire, so a cold worker
/// does not hold a connection while its queue is empty.
pub fn create_pool(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect_lazy_with(config.connect_options()?);

    tracing::info!(
        max_connections = config.max_connections,
        "PostgreSQL pool configured"
    );
    Ok(pool)
}

/// Apply the bundled migrations in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
