//! Redis pool for the Redis-backed dedup ledger.
//!
//! Startup fails when Redis does not answer PING: a ledger that cannot be
//! reached cannot tell a replay from a first delivery.

pub mod error;
pub mod keys;
pub mod ledger;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info};

pub use error::{CacheError, CacheResult};
pub use ledger::RedisLedger;

pub type RedisPool = Pool<RedisConnectionManager>;

#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub url: String,
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl RedisPoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_size: 16,
            min_idle: 2,
            connection_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub async fn init_redis_pool(config: &RedisPoolConfig) -> CacheResult<RedisPool> {
    let manager = RedisConnectionManager::new(config.url.as_str()).map_err(|e| {
        error!(error = %e, "invalid Redis URL");
        CacheError::Command(e)
    })?;

    let pool = Pool::builder()
        .max_size(config.max_size)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .build(manager)
        .await?;

    ping(&pool).await?;
    info!(max_size = config.max_size, "Redis pool ready");
    Ok(pool)
}

/// Round-trips a PING over a pooled connection.
pub async fn ping(pool: &RedisPool) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
    if reply != "PONG" {
        return Err(CacheError::UnexpectedReply(reply));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = RedisPoolConfig::new("redis://127.0.0.1:6379");
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert!(config.min_idle <= config.max_size);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let pool = init_redis_pool(&RedisPoolConfig::new(url)).await.unwrap();
        assert!(ping(&pool).await.is_ok());
    }
}
