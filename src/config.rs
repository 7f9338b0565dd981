//! Startup configuration, read from the environment (and `.env` when
//! present) and validated before anything connects.

use crate::ledger::MAX_RETENTION_SECS;
use crate::services::reconciler::ReconcilerConfig;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Order store and, with `LEDGER_BACKEND=postgres`, the ledger.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// seconds
    pub connection_timeout: u64,
    /// seconds
    pub idle_timeout: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            other => Err(ConfigError::InvalidValue(format!(
                "LOG_FORMAT must be json or plain, got '{}'",
                other
            ))),
        }
    }
}

/// Where processed transaction ids are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Postgres,
    Redis,
}

impl FromStr for LedgerBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "postgres" | "postgresql" => Ok(LedgerBackend::Postgres),
            "redis" => Ok(LedgerBackend::Redis),
            other => Err(ConfigError::InvalidValue(format!(
                "LEDGER_BACKEND must be memory, postgres or redis, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub retention_secs: u64,
    /// Only bounds the in-memory backend.
    pub max_entries: usize,
    pub purge_interval_secs: u64,
    pub redis_url: Option<String>,
}

/// Reads `key`, falling back to `default` when unset or blank.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}='{}'", key, raw))),
        _ => Ok(default),
    }
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidValue(message.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            ledger: LedgerConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.ledger.validate()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env_or("SERVER_HOST", "127.0.0.1".to_string())?,
            port: env_or("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("SERVER_PORT cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("SERVER_HOST cannot be empty"));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env_required("DATABASE_URL")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env_or("DB_IDLE_TIMEOUT", 0).map(|secs| (secs > 0).then_some(secs))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(invalid("DATABASE_URL must be a postgres:// URL"));
        }
        if self.max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS must be positive"));
        }
        if self.min_connections > self.max_connections {
            return Err(invalid("DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS"));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env_or("LOG_LEVEL", "INFO".to_string())?,
            format: env_or("LOG_FORMAT", LogFormat::Plain)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_uppercase().as_str() {
            "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" => Ok(()),
            _ => Err(invalid("LOG_LEVEL must be one of TRACE, DEBUG, INFO, WARN, ERROR")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(LedgerConfig {
            backend: env_or("LEDGER_BACKEND", defaults.backend)?,
            retention_secs: env_or("LEDGER_RETENTION_SECS", defaults.retention_secs)?,
            max_entries: env_or("LEDGER_MAX_ENTRIES", defaults.max_entries)?,
            purge_interval_secs: env_or(
                "LEDGER_PURGE_INTERVAL_SECS",
                defaults.purge_interval_secs,
            )?,
            redis_url: env_required("REDIS_URL").ok(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_secs == 0 {
            return Err(invalid("LEDGER_RETENTION_SECS must be positive"));
        }
        if self.retention_secs > MAX_RETENTION_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "LEDGER_RETENTION_SECS must be at most {} (365 days)",
                MAX_RETENTION_SECS
            )));
        }
        if self.max_entries == 0 {
            return Err(invalid("LEDGER_MAX_ENTRIES must be positive"));
        }
        if self.purge_interval_secs == 0 {
            return Err(invalid("LEDGER_PURGE_INTERVAL_SECS must be positive"));
        }

        if self.backend == LedgerBackend::Redis {
            let url = self
                .redis_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingVariable("REDIS_URL".to_string()))?;
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(invalid("REDIS_URL must start with redis:// or rediss://"));
            }
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            // a week, well past the longest gateway retry window
            retention_secs: 604_800,
            max_entries: 100_000,
            purge_interval_secs: 3600,
            redis_url: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
        }
    }

    #[test]
    fn test_server_port_zero_is_rejected() {
        let mut config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };
        assert!(config.validate().is_ok());
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url_must_be_postgres() {
        assert!(database("postgres://localhost/zentrix").validate().is_ok());
        assert!(database("mysql://localhost/zentrix").validate().is_err());

        let mut config = database("postgres://localhost/zentrix");
        config.min_connections = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ledger_backend_parsing() {
        assert_eq!("memory".parse::<LedgerBackend>().unwrap(), LedgerBackend::Memory);
        assert_eq!("Postgres".parse::<LedgerBackend>().unwrap(), LedgerBackend::Postgres);
        assert_eq!("redis".parse::<LedgerBackend>().unwrap(), LedgerBackend::Redis);
        assert!("sqlite".parse::<LedgerBackend>().is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("plain".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_redis_ledger_requires_url() {
        let mut config = LedgerConfig {
            backend: LedgerBackend::Redis,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(_))
        ));

        config.redis_url = Some("http://localhost:6379".to_string());
        assert!(config.validate().is_err());

        config.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let config = LedgerConfig {
            retention_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retention_longer_than_a_year_is_rejected() {
        let mut config = LedgerConfig {
            retention_secs: MAX_RETENTION_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.retention_secs = MAX_RETENTION_SECS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
        config.retention_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());
        config.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_falls_back_and_rejects_garbage() {
        std::env::remove_var("ZENTRIX_TEST_UNSET");
        assert_eq!(env_or("ZENTRIX_TEST_UNSET", 7u32).unwrap(), 7);

        std::env::set_var("ZENTRIX_TEST_PORT", "not-a-number");
        assert!(env_or("ZENTRIX_TEST_PORT", 8000u16).is_err());
        std::env::remove_var("ZENTRIX_TEST_PORT");
    }
}
