use crate::ledger::{
    LedgerError, LedgerInsert, LedgerResult, NewTransactionRecord, RetentionPolicy,
    TransactionLedger, TransactionRecord,
};
use crate::payments::types::GatewayName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type LedgerKey = (GatewayName, String);

/// Process-local ledger. Check and insert happen under one lock, so it is
/// atomic within this process only; use the Postgres or Redis ledger when
/// more than one instance serves callbacks.
pub struct InMemoryLedger {
    records: Mutex<HashMap<LedgerKey, TransactionRecord>>,
    capacity: usize,
    retention: RetentionPolicy,
}

impl InMemoryLedger {
    pub fn new(capacity: usize, retention: RetentionPolicy) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            capacity,
            retention,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn purge_locked(
        &self,
        records: &mut HashMap<LedgerKey, TransactionRecord>,
        now: DateTime<Utc>,
    ) -> u64 {
        let before = records.len();
        records.retain(|_, record| !self.retention.is_expired(record, now));
        (before - records.len()) as u64
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(100_000, RetentionPolicy::default())
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn check_and_insert(&self, record: NewTransactionRecord) -> LedgerResult<LedgerInsert> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let key = (record.gateway, record.transaction_id.clone());

        if let Some(existing) = records.get(&key) {
            if !self.retention.is_expired(existing, now) {
                return Ok(LedgerInsert::AlreadyProcessed(Some(existing.clone())));
            }
            debug!(transaction_id = %record.transaction_id, "replacing expired ledger record");
            records.remove(&key);
        }

        if records.len() >= self.capacity {
            let purged = self.purge_locked(&mut records, now);
            if records.len() >= self.capacity {
                warn!(
                    capacity = self.capacity,
                    purged,
                    "in-memory ledger is full"
                );
                return Err(LedgerError::CapacityExhausted {
                    capacity: self.capacity,
                });
            }
        }

        let stored = record.into_record(now);
        records.insert(key, stored.clone());
        Ok(LedgerInsert::Inserted(stored))
    }

    async fn get(
        &self,
        gateway: GatewayName,
        transaction_id: &str,
    ) -> LedgerResult<Option<TransactionRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(&(gateway, transaction_id.to_string())).cloned())
    }

    async fn release(&self, gateway: GatewayName, transaction_id: &str) -> LedgerResult<bool> {
        let mut records = self.records.lock().await;
        Ok(records
            .remove(&(gateway, transaction_id.to_string()))
            .is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let mut records = self.records.lock().await;
        Ok(self.purge_locked(&mut records, now))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
