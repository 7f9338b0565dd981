use crate::ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No connection could be had from the pool.
    #[error("Redis unavailable: {0}")]
    Unavailable(String),
    #[error("Redis command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("Stored ledger entry is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("Unexpected Redis reply: {0}")]
    UnexpectedReply(String),
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        match err {
            bb8::RunError::User(e) => CacheError::Command(e),
            bb8::RunError::TimedOut => {
                CacheError::Unavailable("timed out waiting for a pooled connection".to_string())
            }
        }
    }
}

impl From<CacheError> for LedgerError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Corrupt(e) => LedgerError::Serialization(e.to_string()),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
