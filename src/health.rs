//! Health check module
//! Reports the state of the ledger and the stores behind it

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::ledger::TransactionLedger;
use crate::payments::types::GatewayName;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const SLOW_RESPONSE_MS: u128 = 1000;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// A down critical component makes the service unhealthy; anything
    /// else short of up only degrades it.
    fn record(&mut self, name: &str, health: ComponentHealth, critical: bool) {
        let next = match (health.status, critical) {
            (ComponentState::Up, _) => HealthState::Healthy,
            (ComponentState::Down, true) => HealthState::Unhealthy,
            _ => HealthState::Degraded,
        };
        self.status = match (self.status, next) {
            (HealthState::Unhealthy, _) | (_, HealthState::Unhealthy) => HealthState::Unhealthy,
            (HealthState::Degraded, _) | (_, HealthState::Degraded) => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
        self.checks.insert(name.to_string(), health);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }

    fn from_probe(result: Result<Result<u128, String>, tokio::time::error::Elapsed>) -> Self {
        match result {
            Ok(Ok(ms)) if ms > SLOW_RESPONSE_MS => {
                ComponentHealth::warning(Some(ms), Some("Slow response".to_string()))
            }
            Ok(Ok(ms)) => ComponentHealth::up(Some(ms)),
            Ok(Err(e)) => ComponentHealth::down(Some(e)),
            Err(_) => ComponentHealth::down(Some("Timeout".to_string())),
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    ledger: Arc<dyn TransactionLedger>,
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    redis_pool: Option<crate::cache::RedisPool>,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn TransactionLedger>) -> Self {
        Self {
            ledger,
            #[cfg(feature = "database")]
            db_pool: None,
            #[cfg(feature = "cache")]
            redis_pool: None,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: crate::cache::RedisPool) -> Self {
        self.redis_pool = Some(pool);
        self
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let ledger = ComponentHealth::from_probe(
            timeout(CHECK_TIMEOUT, check_ledger_health(self.ledger.as_ref())).await,
        );
        log_component("ledger", &ledger);
        health_status.record("ledger", ledger, true);

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let database =
                ComponentHealth::from_probe(timeout(CHECK_TIMEOUT, check_database_health(pool)).await);
            log_component("database", &database);
            health_status.record("database", database, true);
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.redis_pool {
            let cache =
                ComponentHealth::from_probe(timeout(CHECK_TIMEOUT, check_cache_health(pool)).await);
            log_component("cache", &cache);
            health_status.record("cache", cache, self.ledger.backend() == "redis");
        }

        health_status
    }
}

fn log_component(name: &str, health: &ComponentHealth) {
    match health.status {
        ComponentState::Up => info!(
            component = name,
            response_time_ms = ?health.response_time_ms,
            "health check OK"
        ),
        ComponentState::Warning => warn!(
            component = name,
            response_time_ms = ?health.response_time_ms,
            "health check slow"
        ),
        ComponentState::Down => error!(
            component = name,
            details = ?health.details,
            "health check failed"
        ),
    }
}

/// Reads a key that never exists, which exercises the full backend path.
pub async fn check_ledger_health(ledger: &dyn TransactionLedger) -> Result<u128, String> {
    let start = Instant::now();
    ledger
        .get(GatewayName::MoMo, "__health_probe__")
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(feature = "database")]
pub async fn check_database_health(pool: &sqlx::PgPool) -> Result<u128, String> {
    let start = Instant::now();
    crate::database::ping(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}

#[cfg(feature = "cache")]
pub async fn check_cache_health(pool: &crate::cache::RedisPool) -> Result<u128, String> {
    let start = Instant::now();
    crate::cache::ping(pool)
        .await
        .map(|_| start.elapsed().as_millis())
        .map_err(|e| e.to_string())
}
