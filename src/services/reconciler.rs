//! Callback reconciliation
//!
//! Turns a raw gateway callback into exactly one order side effect. The
//! sequence is fixed: verify, claim the transaction in the ledger, then
//! touch the order. Only the caller that wins the ledger claim gets to
//! call the order collaborator, so replays and races collapse into
//! `DuplicateIgnored`.

use crate::ledger::{
    LedgerError, LedgerInsert, NewTransactionRecord, TransactionLedger, TransactionOutcome,
};
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{CallbackPayload, CallbackStatus, GatewayName, VerifiedCallback};
use crate::services::orders::{OrderStatusUpdater, OrderUpdateError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Record a callback whose amount disagrees with the order as a failure.
    pub strict_amount: bool,
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        Self {
            strict_amount: std::env::var("RECONCILER_STRICT_AMOUNT")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            strict_amount: false,
        }
    }
}

/// Where a single callback is in its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationState {
    Unseen,
    Verifying,
    Accepted,
    Rejected,
}

impl ReconciliationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconciliationState::Accepted | ReconciliationState::Rejected
        )
    }

    pub fn can_transition_to(&self, next: ReconciliationState) -> bool {
        use ReconciliationState::*;
        matches!(
            (self, next),
            (Unseen, Verifying) | (Verifying, Accepted) | (Verifying, Rejected)
        )
    }

    pub fn transition(self, next: ReconciliationState) -> Result<Self, ReconcileError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ReconcileError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconciliationState::Unseen => "unseen",
            ReconciliationState::Verifying => "verifying",
            ReconciliationState::Accepted => "accepted",
            ReconciliationState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    SignatureInvalid,
    MalformedCallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    Success,
    Failure,
    DuplicateIgnored,
    Rejected(RejectionReason),
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Success => "SUCCESS",
            ReconciliationStatus::Failure => "FAILURE",
            ReconciliationStatus::DuplicateIgnored => "DUPLICATE",
            ReconciliationStatus::Rejected(_) => "REJECTED",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<TransactionOutcome> for ReconciliationStatus {
    fn from(outcome: TransactionOutcome) -> Self {
        match outcome {
            TransactionOutcome::Success => ReconciliationStatus::Success,
            TransactionOutcome::Failure => ReconciliationStatus::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub gateway: GatewayName,
    pub status: ReconciliationStatus,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub amount: Option<u64>,
    /// For duplicates, what the first callback decided.
    pub previous_outcome: Option<TransactionOutcome>,
    /// A duplicate seen while another delivery of the same transaction is
    /// still being handled here. Its order update may yet fail and release
    /// the ledger record, so the gateway should be asked to retry.
    pub in_flight: bool,
}

impl ReconciliationOutcome {
    fn rejected(gateway: GatewayName, reason: RejectionReason) -> Self {
        Self {
            gateway,
            status: ReconciliationStatus::Rejected(reason),
            transaction_id: None,
            order_id: None,
            amount: None,
            previous_outcome: None,
            in_flight: false,
        }
    }

    fn from_verified(
        callback: &VerifiedCallback,
        status: ReconciliationStatus,
        previous_outcome: Option<TransactionOutcome>,
    ) -> Self {
        Self {
            gateway: callback.gateway,
            status,
            transaction_id: Some(callback.transaction_id.clone()),
            order_id: Some(callback.order_id.clone()),
            amount: Some(callback.amount),
            previous_outcome,
            in_flight: false,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, ReconciliationStatus::Rejected(_))
    }
}

/// Internal failures. Never used for duplicates or bad callbacks, which
/// are outcomes.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Order update failed for {order_id}: {source}")]
    OrderUpdate {
        order_id: String,
        #[source]
        source: OrderUpdateError,
    },

    #[error("Gateway misconfigured: {0}")]
    Configuration(String),

    #[error("Illegal reconciliation transition {from} -> {to}")]
    InvalidTransition {
        from: ReconciliationState,
        to: ReconciliationState,
    },
}

impl From<ReconcileError> for crate::error::AppError {
    fn from(err: ReconcileError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match err {
            ReconcileError::Ledger(e) => {
                AppErrorKind::Infrastructure(InfrastructureError::Ledger {
                    message: e.to_string(),
                })
            }
            ReconcileError::OrderUpdate { order_id, source } => {
                AppErrorKind::Domain(DomainError::OrderUpdateFailed {
                    order_id,
                    reason: source.to_string(),
                })
            }
            ReconcileError::Configuration(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            e @ ReconcileError::InvalidTransition { .. } => {
                AppErrorKind::Infrastructure(InfrastructureError::Ledger {
                    message: e.to_string(),
                })
            }
        };
        AppError::new(kind)
    }
}

type TransactionKey = (GatewayName, String);

/// Counts deliveries of each transaction currently between the ledger
/// claim and the end of the order update in this process.
#[derive(Default)]
struct InFlight(Mutex<HashMap<TransactionKey, usize>>);

impl InFlight {
    fn enter(&self, key: TransactionKey) -> InFlightGuard<'_> {
        let mut counts = self.0.lock().unwrap_or_else(|p| p.into_inner());
        *counts.entry(key.clone()).or_insert(0) += 1;
        InFlightGuard { set: self, key }
    }

    fn others(&self, key: &TransactionKey) -> bool {
        let counts = self.0.lock().unwrap_or_else(|p| p.into_inner());
        counts.get(key).copied().unwrap_or(0) > 1
    }
}

struct InFlightGuard<'a> {
    set: &'a InFlight,
    key: TransactionKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut counts = self.set.0.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = counts.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.key);
            }
        }
    }
}

pub struct CallbackReconciler {
    registry: GatewayRegistry,
    ledger: Arc<dyn TransactionLedger>,
    orders: Arc<dyn OrderStatusUpdater>,
    config: ReconcilerConfig,
    in_flight: InFlight,
}

impl CallbackReconciler {
    pub fn new(
        registry: GatewayRegistry,
        ledger: Arc<dyn TransactionLedger>,
        orders: Arc<dyn OrderStatusUpdater>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            orders,
            config,
            in_flight: InFlight::default(),
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn TransactionLedger> {
        &self.ledger
    }

    pub async fn reconcile(
        &self,
        gateway: GatewayName,
        payload: CallbackPayload,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let state = ReconciliationState::Unseen.transition(ReconciliationState::Verifying)?;

        let client = self
            .registry
            .get(gateway)
            .map_err(|e| ReconcileError::Configuration(e.to_string()))?;

        let callback = match client.verify_callback(&payload) {
            Ok(callback) => callback,
            Err(err) => {
                let reason = match &err {
                    PaymentError::SignatureInvalid { .. } => RejectionReason::SignatureInvalid,
                    PaymentError::MalformedCallback { .. }
                    | PaymentError::ValidationError { .. } => RejectionReason::MalformedCallback,
                    PaymentError::ConfigurationError { message } => {
                        error!(gateway = %gateway, error = %message, "cannot verify callback");
                        return Err(ReconcileError::Configuration(message.clone()));
                    }
                    other => {
                        // verify_callback does no I/O, so these should not occur
                        error!(gateway = %gateway, error = %other, "unexpected verification error");
                        return Err(ReconcileError::Configuration(other.to_string()));
                    }
                };
                state.transition(ReconciliationState::Rejected)?;
                warn!(
                    target: "audit",
                    gateway = %gateway,
                    reason = ?reason,
                    error = %err,
                    outcome = "REJECTED",
                    "callback rejected"
                );
                return Ok(ReconciliationOutcome::rejected(gateway, reason));
            }
        };

        let outcome = self.decide_outcome(&callback).await?;
        let record = NewTransactionRecord {
            gateway: callback.gateway,
            transaction_id: callback.transaction_id.clone(),
            order_id: callback.order_id.clone(),
            amount: callback.amount,
            outcome,
        };

        // Entered before the claim so a winner is always counted while a
        // loser inspects the set.
        let key = (callback.gateway, callback.transaction_id.clone());
        let _guard = self.in_flight.enter(key.clone());

        let inserted = match self.ledger.check_and_insert(record).await {
            Ok(inserted) => inserted,
            Err(err) => {
                if matches!(err, LedgerError::CapacityExhausted { .. }) {
                    error!(
                        gateway = %gateway,
                        transaction_id = %callback.transaction_id,
                        backend = self.ledger.backend(),
                        "ledger full, refusing callback"
                    );
                } else {
                    error!(
                        gateway = %gateway,
                        transaction_id = %callback.transaction_id,
                        backend = self.ledger.backend(),
                        error = %err,
                        "ledger check failed, refusing callback"
                    );
                }
                return Err(ReconcileError::Ledger(err));
            }
        };

        let result = match inserted {
            LedgerInsert::AlreadyProcessed(existing) => {
                let previous = existing.map(|r| r.outcome);
                let in_flight = self.in_flight.others(&key);
                info!(
                    target: "audit",
                    gateway = %gateway,
                    transaction_id = %callback.transaction_id,
                    order_id = %callback.order_id,
                    amount = callback.amount,
                    previous_outcome = ?previous,
                    in_flight,
                    outcome = "DUPLICATE",
                    "duplicate callback ignored"
                );
                let mut outcome = ReconciliationOutcome::from_verified(
                    &callback,
                    ReconciliationStatus::DuplicateIgnored,
                    previous,
                );
                outcome.in_flight = in_flight;
                outcome
            }
            LedgerInsert::Inserted(record) => {
                self.apply(&callback, record.outcome).await?;
                let status = ReconciliationStatus::from(record.outcome);
                info!(
                    target: "audit",
                    gateway = %gateway,
                    transaction_id = %callback.transaction_id,
                    order_id = %callback.order_id,
                    amount = callback.amount,
                    gateway_code = %callback.gateway_code,
                    outcome = %status,
                    "callback reconciled"
                );
                ReconciliationOutcome::from_verified(&callback, status, None)
            }
        };

        state.transition(ReconciliationState::Accepted)?;
        Ok(result)
    }

    async fn decide_outcome(
        &self,
        callback: &VerifiedCallback,
    ) -> Result<TransactionOutcome, ReconcileError> {
        let reported = TransactionOutcome::from(callback.status);
        if callback.status != CallbackStatus::Success {
            return Ok(reported);
        }

        let expected = match self.orders.expected_amount(&callback.order_id).await {
            Ok(expected) => expected,
            Err(err) if self.config.strict_amount => {
                return Err(ReconcileError::OrderUpdate {
                    order_id: callback.order_id.clone(),
                    source: err,
                });
            }
            Err(err) => {
                debug!(order_id = %callback.order_id, error = %err, "expected amount unavailable");
                None
            }
        };

        match expected {
            Some(expected) if expected != callback.amount => {
                warn!(
                    gateway = %callback.gateway,
                    transaction_id = %callback.transaction_id,
                    order_id = %callback.order_id,
                    expected,
                    reported = callback.amount,
                    strict = self.config.strict_amount,
                    "callback amount does not match order"
                );
                if self.config.strict_amount {
                    Ok(TransactionOutcome::Failure)
                } else {
                    Ok(reported)
                }
            }
            _ => Ok(reported),
        }
    }

    async fn apply(
        &self,
        callback: &VerifiedCallback,
        outcome: TransactionOutcome,
    ) -> Result<(), ReconcileError> {
        let applied = match outcome {
            TransactionOutcome::Success => self.orders.mark_paid(&callback.order_id).await,
            TransactionOutcome::Failure => {
                self.orders.mark_payment_failed(&callback.order_id).await
            }
        };

        if let Err(source) = applied {
            error!(
                gateway = %callback.gateway,
                transaction_id = %callback.transaction_id,
                order_id = %callback.order_id,
                error = %source,
                "order update failed, releasing ledger record"
            );
            // Let the gateway's own retry re-apply the side effect.
            if let Err(e) = self
                .ledger
                .release(callback.gateway, &callback.transaction_id)
                .await
            {
                error!(
                    transaction_id = %callback.transaction_id,
                    error = %e,
                    "failed to release ledger record"
                );
            }
            return Err(ReconcileError::OrderUpdate {
                order_id: callback.order_id.clone(),
                source,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::payments::error::PaymentResult;
    use crate::payments::gateway::PaymentGateway;
    use crate::payments::types::{CreatePaymentRequest, PaymentResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Accepts callbacks whose `sig` is "good".
    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_payment(&self, _: CreatePaymentRequest) -> PaymentResult<PaymentResponse> {
            unimplemented!()
        }

        fn verify_callback(&self, payload: &CallbackPayload) -> PaymentResult<VerifiedCallback> {
            if payload.get("sig") != Some("good") {
                return Err(PaymentError::SignatureInvalid {
                    gateway: "momo".to_string(),
                });
            }
            let field = |k: &str| {
                payload.get(k).map(str::to_string).ok_or(PaymentError::MalformedCallback {
                    gateway: "momo".to_string(),
                    message: k.to_string(),
                })
            };
            Ok(VerifiedCallback {
                gateway: GatewayName::MoMo,
                transaction_id: field("txn")?,
                order_id: field("order")?,
                amount: field("amount")?.parse().unwrap_or(0),
                gateway_code: field("code")?,
                status: if field("code")? == "0" {
                    CallbackStatus::Success
                } else {
                    CallbackStatus::Failure
                },
            })
        }

        fn name(&self) -> GatewayName {
            GatewayName::MoMo
        }
    }

    #[derive(Default)]
    struct Orders {
        calls: Mutex<Vec<(String, &'static str)>>,
        expected: Option<u64>,
        fail: bool,
    }

    #[async_trait]
    impl OrderStatusUpdater for Orders {
        async fn mark_paid(&self, order_id: &str) -> Result<(), OrderUpdateError> {
            if self.fail {
                return Err(OrderUpdateError::Storage("down".to_string()));
            }
            self.calls.lock().unwrap().push((order_id.to_string(), "paid"));
            Ok(())
        }

        async fn mark_payment_failed(&self, order_id: &str) -> Result<(), OrderUpdateError> {
            self.calls.lock().unwrap().push((order_id.to_string(), "failed"));
            Ok(())
        }

        async fn expected_amount(&self, _: &str) -> Result<Option<u64>, OrderUpdateError> {
            Ok(self.expected)
        }
    }

    fn build(
        orders: Arc<Orders>,
        config: ReconcilerConfig,
    ) -> (CallbackReconciler, Arc<InMemoryLedger>) {
        let registry =
            GatewayRegistry::with_gateways(
                GatewayName::MoMo,
                vec![Arc::new(StubGateway) as Arc<dyn PaymentGateway>],
            )
            .unwrap();
        let ledger = Arc::new(InMemoryLedger::default());
        (
            CallbackReconciler::new(registry, ledger.clone(), orders, config),
            ledger,
        )
    }

    fn payload(txn: &str, code: &str, sig: &str) -> CallbackPayload {
        CallbackPayload::from_pairs([
            ("txn", txn),
            ("order", "ORD-1"),
            ("amount", "100000"),
            ("code", code),
            ("sig", sig),
        ])
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        use ReconciliationState::*;
        assert_eq!(Unseen.transition(Verifying).unwrap(), Verifying);
        assert!(Accepted.transition(Verifying).is_err());
        assert!(Rejected.transition(Accepted).is_err());
        assert!(Unseen.transition(Accepted).is_err());
        assert!(Accepted.is_terminal() && Rejected.is_terminal());
    }

    #[tokio::test]
    async fn failure_status_marks_order_failed() {
        let orders = Arc::new(Orders::default());
        let (reconciler, _) = build(orders.clone(), ReconcilerConfig::default());
        let outcome = reconciler
            .reconcile(GatewayName::MoMo, payload("T1", "1006", "good"))
            .await
            .unwrap();
        assert_eq!(outcome.status, ReconciliationStatus::Failure);
        assert_eq!(
            *orders.calls.lock().unwrap(),
            vec![("ORD-1".to_string(), "failed")]
        );
    }

    #[tokio::test]
    async fn malformed_callback_is_rejected_without_ledger_entry() {
        let orders = Arc::new(Orders::default());
        let (reconciler, ledger) = build(orders, ReconcilerConfig::default());
        let bad = CallbackPayload::from_pairs([("txn", "T2"), ("sig", "good")]);
        let outcome = reconciler.reconcile(GatewayName::MoMo, bad).await.unwrap();
        assert_eq!(
            outcome.status,
            ReconciliationStatus::Rejected(RejectionReason::MalformedCallback)
        );
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn order_failure_releases_the_ledger_record() {
        let orders = Arc::new(Orders {
            fail: true,
            ..Default::default()
        });
        let (reconciler, ledger) = build(orders, ReconcilerConfig::default());
        let err = reconciler
            .reconcile(GatewayName::MoMo, payload("T3", "0", "good"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::OrderUpdate { .. }));
        assert!(ledger.get(GatewayName::MoMo, "T3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn amount_mismatch_is_a_failure_only_in_strict_mode() {
        let lenient = Arc::new(Orders {
            expected: Some(1),
            ..Default::default()
        });
        let (reconciler, _) = build(lenient, ReconcilerConfig::default());
        let outcome = reconciler
            .reconcile(GatewayName::MoMo, payload("T4", "0", "good"))
            .await
            .unwrap();
        assert_eq!(outcome.status, ReconciliationStatus::Success);

        let strict = Arc::new(Orders {
            expected: Some(1),
            ..Default::default()
        });
        let (reconciler, _) = build(strict.clone(), ReconcilerConfig { strict_amount: true });
        let outcome = reconciler
            .reconcile(GatewayName::MoMo, payload("T4", "0", "good"))
            .await
            .unwrap();
        assert_eq!(outcome.status, ReconciliationStatus::Failure);
        assert_eq!(strict.calls.lock().unwrap()[0].1, "failed");
    }

    #[tokio::test]
    async fn disabled_gateway_is_a_configuration_error() {
        let (reconciler, _) = build(Arc::new(Orders::default()), ReconcilerConfig::default());
        let err = reconciler
            .reconcile(GatewayName::VnPay, payload("T5", "0", "good"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }
}
