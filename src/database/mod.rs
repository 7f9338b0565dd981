//! Postgres access: the order status store and the Postgres dedup ledger.

pub mod error;
pub mod order_repository;
pub mod transaction_repository;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

use self::error::DatabaseError;
use crate::config::DatabaseConfig;

pub use order_repository::PgOrderRepository;
pub use transaction_repository::PgLedger;

const MAX_LIFETIME: Duration = Duration::from_secs(1800);
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(
            config.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        ))
        .max_lifetime(MAX_LIFETIME)
}

/// Opens the pool and proves one connection works before returning it.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "connecting to Postgres"
    );

    let pool = pool_options(config)
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!(error = %e, "Postgres pool could not be created");
            DatabaseError::from_sqlx(e)
        })?;
    ping(&pool).await?;

    Ok(pool)
}

pub async fn ping(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
        warn!(error = %e, "Postgres ping failed");
        DatabaseError::from_sqlx(e)
    })?;
    Ok(())
}
