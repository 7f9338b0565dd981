use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::ledger::{LedgerResult, TransactionLedger};

/// Periodically drops ledger records older than the retention window.
pub struct LedgerRetentionWorker {
    ledger: Arc<dyn TransactionLedger>,
    interval: Duration,
}

impl LedgerRetentionWorker {
    pub fn new(ledger: Arc<dyn TransactionLedger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        // the first tick fires immediately; nothing can have expired yet
        ticker.tick().await;
        info!(
            interval_secs = self.interval.as_secs(),
            backend = self.ledger.backend(),
            "ledger retention worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("ledger retention worker stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "ledger purge failed");
                    }
                }
            }
        }

        info!("ledger retention worker stopped");
    }

    pub async fn run_once(&self) -> LedgerResult<u64> {
        let purged = self.ledger.purge_expired(chrono::Utc::now()).await?;
        if purged > 0 {
            info!(purged, backend = self.ledger.backend(), "purged expired ledger records");
        } else {
            debug!(backend = self.ledger.backend(), "no expired ledger records");
        }
        Ok(purged)
    }
}
