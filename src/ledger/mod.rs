//! Transaction dedup ledger
//!
//! Records which gateway transactions have already been reconciled. The
//! only write path is [`TransactionLedger::check_and_insert`], which must be
//! atomic: two concurrent callers for the same transaction can never both
//! see `Inserted`.
//!
//! Backends:
//! - [`memory::InMemoryLedger`]: bounded map behind a mutex
//! - `database::transaction_repository::PgLedger`: unique-constraint insert
//! - `cache::ledger::RedisLedger`: `SET NX EX`

pub mod memory;

use crate::payments::types::{CallbackStatus, GatewayName};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub use memory::InMemoryLedger;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success,
    Failure,
}

impl TransactionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOutcome::Success => "success",
            TransactionOutcome::Failure => "failure",
        }
    }
}

impl From<CallbackStatus> for TransactionOutcome {
    fn from(status: CallbackStatus) -> Self {
        match status {
            CallbackStatus::Success => TransactionOutcome::Success,
            CallbackStatus::Failure => TransactionOutcome::Failure,
        }
    }
}

impl FromStr for TransactionOutcome {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(TransactionOutcome::Success),
            "failure" => Ok(TransactionOutcome::Failure),
            other => Err(LedgerError::Serialization(format!(
                "unknown transaction outcome: {}",
                other
            ))),
        }
    }
}

/// A reconciled transaction. Never modified after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub gateway: GatewayName,
    pub transaction_id: String,
    pub order_id: String,
    pub amount: u64,
    pub outcome: TransactionOutcome,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransactionRecord {
    pub gateway: GatewayName,
    pub transaction_id: String,
    pub order_id: String,
    pub amount: u64,
    pub outcome: TransactionOutcome,
}

impl NewTransactionRecord {
    pub fn into_record(self, processed_at: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            gateway: self.gateway,
            transaction_id: self.transaction_id,
            order_id: self.order_id,
            amount: self.amount,
            outcome: self.outcome,
            processed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInsert {
    /// This caller won the race and owns the side effects.
    Inserted(TransactionRecord),
    /// Someone already reconciled this transaction. The existing record is
    /// returned when the backend can read it back.
    AlreadyProcessed(Option<TransactionRecord>),
}

impl LedgerInsert {
    pub fn is_inserted(&self) -> bool {
        matches!(self, LedgerInsert::Inserted(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger storage error: {0}")]
    Storage(String),
    #[error("Ledger is full: capacity={capacity}")]
    CapacityExhausted { capacity: usize },
    #[error("Ledger serialization error: {0}")]
    Serialization(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Atomically records `record` unless the transaction is already present.
    async fn check_and_insert(&self, record: NewTransactionRecord) -> LedgerResult<LedgerInsert>;

    async fn get(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> LedgerResult<Option<TransactionRecord>>;

    /// Removes a record this process just inserted, after its side effect
    /// failed. Returns whether a record was removed.
    async fn release(&self, gateway: GatewayName, transaction_id: &str) -> LedgerResult<bool>;

    /// Drops records older than the retention window. Returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64>;

    fn backend(&self) -> &'static str;
}

/// Upper bound on the retention window: one year.
pub const MAX_RETENTION_SECS: u64 = 365 * 24 * 3600;

/// How long records are kept. Must exceed the longest gateway callback
/// retry window.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub retention: Duration,
}

impl RetentionPolicy {
    /// Windows longer than [`MAX_RETENTION_SECS`] are clamped to it.
    pub fn from_secs(secs: u64) -> Self {
        let secs = secs.min(MAX_RETENTION_SECS) as i64;
        Self {
            retention: Duration::try_seconds(secs).unwrap_or_else(|| Duration::days(365)),
        }
    }

    /// Records processed before this instant are expired. Saturates at the
    /// earliest representable time, where nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired(&self, record: &TransactionRecord, now: DateTime<Utc>) -> bool {
        record.processed_at < self.cutoff(now)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_secs(7 * 24 * 3600)
    }
}
