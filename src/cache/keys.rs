//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod ledger {
    use super::*;
    use crate::payments::types::GatewayName;

    pub const NAMESPACE: &str = "ledger";

    /// One reconciled gateway transaction.
    #[derive(Debug, Clone)]
    pub struct TransactionKey {
        pub gateway: GatewayName,
        pub transaction_id: String,
    }

    impl TransactionKey {
        pub fn new(gateway: GatewayName, transaction_id: impl Into<String>) -> Self {
            Self {
                gateway,
                transaction_id: transaction_id.into(),
            }
        }
    }

    impl fmt::Display for TransactionKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}",
                VERSION, NAMESPACE, self.gateway, self.transaction_id
            )
        }
    }
}
