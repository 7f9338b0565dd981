//! The narrow slice of the order domain the reconciler is allowed to touch.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OrderUpdateError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },
    #[error("Order store error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait OrderStatusUpdater: Send + Sync {
    async fn mark_paid(&self, order_id: &str) -> Result<(), OrderUpdateError>;

    async fn mark_payment_failed(&self, order_id: &str) -> Result<(), OrderUpdateError>;

    /// Amount the order expects, in VND. `None` when the store cannot tell.
    async fn expected_amount(&self, _order_id: &str) -> Result<Option<u64>, OrderUpdateError> {
        Ok(None)
    }
}
