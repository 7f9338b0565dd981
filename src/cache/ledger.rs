use crate::cache::error::{CacheError, CacheResult};
use crate::cache::keys::ledger::TransactionKey;
use crate::cache::RedisPool;
use crate::ledger::{
    LedgerInsert, LedgerResult, NewTransactionRecord, RetentionPolicy, TransactionLedger,
    TransactionRecord,
};
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::debug;

/// Ledger on Redis. `SET NX EX` is the atomic check-and-insert and the key
/// TTL is the retention window, so there is nothing to purge by hand.
#[derive(Clone)]
pub struct RedisLedger {
    pool: RedisPool,
    retention: RetentionPolicy,
}

impl RedisLedger {
    pub fn new(pool: RedisPool, retention: RetentionPolicy) -> Self {
        Self { pool, retention }
    }

    fn ttl_secs(&self) -> u64 {
        self.retention.retention.num_seconds().max(1) as u64
    }

    async fn set_nx(&self, key: &str, value: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        // Redis replies OK when the key was set and nil when it already existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async(&mut *conn)
            .await?;
        match reply.as_deref() {
            Some("OK") => Ok(true),
            None => Ok(false),
            Some(other) => Err(CacheError::UnexpectedReply(format!("SET {}", other))),
        }
    }

    async fn read(&self, key: &str) -> CacheResult<Option<TransactionRecord>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransactionLedger for RedisLedger {
    async fn check_and_insert(&self, record: NewTransactionRecord) -> LedgerResult<LedgerInsert> {
        let key = TransactionKey::new(record.gateway, record.transaction_id.clone()).to_string();
        let stored = record.into_record(Utc::now());
        let value = serde_json::to_string(&stored).map_err(CacheError::from)?;

        if self.set_nx(&key, &value).await? {
            Ok(LedgerInsert::Inserted(stored))
        } else {
            debug!(key = %key, "ledger key already present");
            let existing = self.read(&key).await?;
            Ok(LedgerInsert::AlreadyProcessed(existing))
        }
    }

    async fn get(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let key = TransactionKey::new(gateway, transaction_id).to_string();
        Ok(self.read(&key).await?)
    }

    async fn release(&self, gateway: GatewayName, transaction_id: &str) -> LedgerResult<bool> {
        let key = TransactionKey::new(gateway, transaction_id).to_string();
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let removed: u64 = conn.del(&key).await.map_err(CacheError::from)?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> LedgerResult<u64> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
