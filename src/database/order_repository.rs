use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::services::orders::{OrderStatusUpdater, OrderUpdateError};
use async_trait::async_trait;
use sqlx::PgPool;

pub const STATUS_PAID: &str = "PAID";
pub const STATUS_PAYMENT_FAILED: &str = "PAYMENT_FAILED";

/// Updates payment status on the store's `orders` table. Order ids arrive
/// as gateway strings, so the key is compared as text.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(&self, order_id: &str, status: &str) -> Result<(), DatabaseError> {
        // A paid order is never downgraded by a later failed attempt.
        let result = sqlx::query(
            "UPDATE orders SET status = $2
             WHERE CAST(id AS TEXT) = $1 AND status <> $3",
        )
        .bind(order_id)
        .bind(status)
        .bind(STATUS_PAID)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE CAST(id AS TEXT) = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if exists {
            Ok(())
        } else {
            Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "order".to_string(),
                id: order_id.to_string(),
            }))
        }
    }
}

impl From<DatabaseError> for OrderUpdateError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { id, .. } => OrderUpdateError::NotFound { order_id: id },
            _ => OrderUpdateError::Storage(err.to_string()),
        }
    }
}

#[async_trait]
impl OrderStatusUpdater for PgOrderRepository {
    async fn mark_paid(&self, order_id: &str) -> Result<(), OrderUpdateError> {
        Ok(self.set_status(order_id, STATUS_PAID).await?)
    }

    async fn mark_payment_failed(&self, order_id: &str) -> Result<(), OrderUpdateError> {
        Ok(self.set_status(order_id, STATUS_PAYMENT_FAILED).await?)
    }

    async fn expected_amount(&self, order_id: &str) -> Result<Option<u64>, OrderUpdateError> {
        let amount = sqlx::query_scalar::<_, i64>(
            "SELECT CAST(total_amount AS BIGINT) FROM orders WHERE CAST(id AS TEXT) = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(amount.and_then(|a| u64::try_from(a).ok()))
    }
}
