//! Shared fixtures: gateways with test secrets, signed callbacks and an
//! order store that records what it was asked to do.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use zentrix_payments::ledger::{InMemoryLedger, TransactionLedger};
use zentrix_payments::payments::factory::GatewayRegistry;
use zentrix_payments::payments::gateway::PaymentGateway;
use zentrix_payments::payments::gateways::{momo, vnpay};
use zentrix_payments::payments::gateways::{MomoConfig, MomoGateway, VnpayConfig, VnpayGateway};
use zentrix_payments::payments::types::{CallbackPayload, GatewayName};
use zentrix_payments::services::orders::{OrderStatusUpdater, OrderUpdateError};
use zentrix_payments::services::reconciler::{CallbackReconciler, ReconcilerConfig};

pub const MOMO_PARTNER: &str = "MOMOBKUN20180529";
pub const MOMO_ACCESS_KEY: &str = "klm05TvNBzhg7h7j";
pub const MOMO_SECRET: &str = "at67qH6mk8w5Y1nAyMoYKMWACiEi2bsa";
pub const VNPAY_TMN: &str = "ZENTRIX1";
pub const VNPAY_SECRET: &str = "VNPAYTESTHASHSECRET0123456789ABC";

pub fn momo_config(endpoint: &str) -> MomoConfig {
    MomoConfig {
        partner_code: MOMO_PARTNER.to_string(),
        access_key: MOMO_ACCESS_KEY.to_string(),
        secret_key: MOMO_SECRET.to_string(),
        endpoint: endpoint.to_string(),
        ipn_url: "https://api.zentrix.vn/api/payments/momo/ipn".to_string(),
        timeout_secs: 5,
        max_retries: 0,
        ..MomoConfig::default()
    }
}

pub fn momo_config_with_retries(endpoint: &str, max_retries: u32) -> MomoConfig {
    MomoConfig {
        max_retries,
        ..momo_config(endpoint)
    }
}

pub fn momo_gateway(endpoint: &str) -> MomoGateway {
    MomoGateway::new(momo_config(endpoint)).expect("momo gateway")
}

pub fn vnpay_gateway() -> VnpayGateway {
    VnpayGateway::new(VnpayConfig {
        tmn_code: VNPAY_TMN.to_string(),
        hash_secret: VNPAY_SECRET.to_string(),
        ..VnpayConfig::default()
    })
    .expect("vnpay gateway")
}

pub fn registry(momo_endpoint: &str) -> GatewayRegistry {
    let gateways: Vec<Arc<dyn PaymentGateway>> = vec![
        Arc::new(momo_gateway(momo_endpoint)),
        Arc::new(vnpay_gateway()),
    ];
    GatewayRegistry::with_gateways(GatewayName::MoMo, gateways).expect("registry")
}

/// MoMo IPN fields as MoMo sends them, before signing.
pub fn momo_fields(trans_id: &str, order_id: &str, amount: u64, result_code: &str) -> BTreeMap<String, String> {
    [
        ("partnerCode", MOMO_PARTNER.to_string()),
        ("orderId", order_id.to_string()),
        ("requestId", format!("req-{}", order_id)),
        ("amount", amount.to_string()),
        ("orderInfo", format!("Thanh toan don hang {}", order_id)),
        ("orderType", "momo_wallet".to_string()),
        ("transId", trans_id.to_string()),
        ("resultCode", result_code.to_string()),
        ("message", "Successful.".to_string()),
        ("payType", "qr".to_string()),
        ("responseTime", "1760844600000".to_string()),
        ("extraData", String::new()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub fn sign_momo(fields: &BTreeMap<String, String>) -> String {
    let mut signed = fields.clone();
    signed.insert("accessKey".to_string(), MOMO_ACCESS_KEY.to_string());
    momo::CALLBACK_SCHEME
        .sign(&signed, MOMO_SECRET)
        .expect("momo signature")
}

pub fn signed_momo(trans_id: &str, order_id: &str, amount: u64, result_code: &str) -> CallbackPayload {
    let fields = momo_fields(trans_id, order_id, amount, result_code);
    let signature = sign_momo(&fields);
    CallbackPayload::new(fields).with("signature", signature)
}

pub fn vnpay_fields(
    transaction_no: &str,
    order_id: &str,
    amount: u64,
    response_code: &str,
) -> BTreeMap<String, String> {
    [
        ("vnp_Amount", (amount * 100).to_string()),
        ("vnp_BankCode", "NCB".to_string()),
        ("vnp_OrderInfo", format!("Thanh toan don hang {}", order_id)),
        ("vnp_PayDate", "20261019103000".to_string()),
        ("vnp_ResponseCode", response_code.to_string()),
        ("vnp_TmnCode", VNPAY_TMN.to_string()),
        ("vnp_TransactionNo", transaction_no.to_string()),
        ("vnp_TransactionStatus", response_code.to_string()),
        ("vnp_TxnRef", order_id.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

pub fn signed_vnpay(
    transaction_no: &str,
    order_id: &str,
    amount: u64,
    response_code: &str,
) -> CallbackPayload {
    let fields = vnpay_fields(transaction_no, order_id, amount, response_code);
    let hash = vnpay::SCHEME
        .sign(&fields, VNPAY_SECRET)
        .expect("vnpay signature");
    CallbackPayload::new(fields)
        .with("vnp_SecureHash", hash)
        .with("vnp_SecureHashType", "HmacSHA512")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCall {
    Paid,
    Failed,
}

/// Order store that remembers every status change, keyed by order id.
#[derive(Default)]
pub struct RecordingOrders {
    pub calls: Mutex<Vec<(String, OrderCall)>>,
    pub expected: Mutex<HashMap<String, u64>>,
}

impl RecordingOrders {
    pub fn expect_amount(&self, order_id: &str, amount: u64) {
        self.expected
            .lock()
            .unwrap()
            .insert(order_id.to_string(), amount);
    }

    pub fn calls_for(&self, order_id: &str) -> Vec<OrderCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == order_id)
            .map(|(_, call)| *call)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderStatusUpdater for RecordingOrders {
    async fn mark_paid(&self, order_id: &str) -> Result<(), OrderUpdateError> {
        self.calls
            .lock()
            .unwrap()
            .push((order_id.to_string(), OrderCall::Paid));
        Ok(())
    }

    async fn mark_payment_failed(&self, order_id: &str) -> Result<(), OrderUpdateError> {
        self.calls
            .lock()
            .unwrap()
            .push((order_id.to_string(), OrderCall::Failed));
        Ok(())
    }

    async fn expected_amount(&self, order_id: &str) -> Result<Option<u64>, OrderUpdateError> {
        Ok(self.expected.lock().unwrap().get(order_id).copied())
    }
}

pub struct Harness {
    pub reconciler: Arc<CallbackReconciler>,
    pub ledger: Arc<dyn TransactionLedger>,
    pub orders: Arc<RecordingOrders>,
}

pub fn harness_with(config: ReconcilerConfig) -> Harness {
    let ledger: Arc<dyn TransactionLedger> = Arc::new(InMemoryLedger::default());
    let orders = Arc::new(RecordingOrders::default());
    let reconciler = Arc::new(CallbackReconciler::new(
        registry("http://127.0.0.1:9"),
        ledger.clone(),
        orders.clone(),
        config,
    ));
    Harness {
        reconciler,
        ledger,
        orders,
    }
}

pub fn harness() -> Harness {
    harness_with(ReconcilerConfig::default())
}
