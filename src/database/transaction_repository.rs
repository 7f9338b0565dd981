use crate::database::error::DatabaseError;
use crate::ledger::{
    LedgerError, LedgerInsert, LedgerResult, NewTransactionRecord, RetentionPolicy,
    TransactionLedger, TransactionOutcome, TransactionRecord,
};
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row in `payment_transactions`
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub gateway: String,
    pub transaction_id: String,
    pub order_id: String,
    pub amount: i64,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            gateway: GatewayName::from_str(&row.gateway)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?,
            transaction_id: row.transaction_id,
            order_id: row.order_id,
            amount: u64::try_from(row.amount)
                .map_err(|_| LedgerError::Serialization(format!("negative amount {}", row.amount)))?,
            outcome: TransactionOutcome::from_str(&row.outcome)?,
            processed_at: row.processed_at,
        })
    }
}

impl From<DatabaseError> for LedgerError {
    fn from(err: DatabaseError) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

/// Ledger backed by `payment_transactions`. The primary key on
/// `(gateway, transaction_id)` is the atomicity boundary, so no in-process
/// lock is involved and any number of instances can share it.
pub struct PgLedger {
    pool: PgPool,
    retention: RetentionPolicy,
}

impl PgLedger {
    pub fn new(pool: PgPool, retention: RetentionPolicy) -> Self {
        Self { pool, retention }
    }

    pub async fn count(&self) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payment_transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl TransactionLedger for PgLedger {
    async fn check_and_insert(&self, record: NewTransactionRecord) -> LedgerResult<LedgerInsert> {
        let amount = i64::try_from(record.amount)
            .map_err(|_| LedgerError::Serialization(format!("amount too large: {}", record.amount)))?;
        let cutoff = self.retention.cutoff(Utc::now());

        // An expired row is overwritten in place; a live one makes the
        // upsert a no-op and RETURNING yields nothing.
        let inserted = sqlx::query_as::<_, TransactionRow>(
            "INSERT INTO payment_transactions
             (gateway, transaction_id, order_id, amount, outcome, processed_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (gateway, transaction_id) DO UPDATE
             SET order_id = EXCLUDED.order_id,
                 amount = EXCLUDED.amount,
                 outcome = EXCLUDED.outcome,
                 processed_at = EXCLUDED.processed_at
             WHERE payment_transactions.processed_at < $6
             RETURNING gateway, transaction_id, order_id, amount, outcome, processed_at",
        )
        .bind(record.gateway.as_str())
        .bind(&record.transaction_id)
        .bind(&record.order_id)
        .bind(amount)
        .bind(record.outcome.as_str())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(row) => Ok(LedgerInsert::Inserted(row.try_into()?)),
            None => {
                let existing = self.get(record.gateway, &record.transaction_id).await?;
                Ok(LedgerInsert::AlreadyProcessed(existing))
            }
        }
    }

    async fn get(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT gateway, transaction_id, order_id, amount, outcome, processed_at
             FROM payment_transactions
             WHERE gateway = $1 AND transaction_id = $2",
        )
        .bind(gateway.as_str())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(TransactionRecord::try_from).transpose()
    }

    async fn release(&self, gateway: GatewayName, transaction_id: &str) -> LedgerResult<bool> {
        let result = sqlx::query(
            "DELETE FROM payment_transactions WHERE gateway = $1 AND transaction_id = $2",
        )
        .bind(gateway.as_str())
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM payment_transactions WHERE processed_at < $1")
            .bind(self.retention.cutoff(now))
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
