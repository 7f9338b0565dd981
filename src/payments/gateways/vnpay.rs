use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::signature::{CanonicalForm, SignatureAlgorithm, SignatureScheme};
use crate::payments::types::{
    validate_absolute_url, CallbackPayload, CallbackStatus, CreatePaymentRequest, GatewayName,
    PaymentResponse, VerifiedCallback,
};
use crate::payments::utils::{parse_amount, required_field};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use std::collections::BTreeMap;
use tracing::info;

const GATEWAY: &str = "vnpay";

/// VNPay signs every `vnp_*` parameter, sorted by name, with form-encoded
/// values and empty values left out.
pub const SCHEME: SignatureScheme = SignatureScheme {
    algorithm: SignatureAlgorithm::HmacSha512,
    form: CanonicalForm::sorted_url_encoded(),
};

const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const SUCCESS_CODE: &str = "00";
const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub version: String,
    pub locale: String,
    pub order_type: String,
    pub expire_minutes: i64,
}

impl Default for VnpayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            version: "2.1.0".to_string(),
            locale: "vn".to_string(),
            order_type: "other".to_string(),
            expire_minutes: 15,
        }
    }
}

impl VnpayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let tmn_code = std::env::var("VNPAY_TMN_CODE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::configuration("VNPAY_TMN_CODE environment variable is required")
            })?;
        let hash_secret = std::env::var("VNPAY_HASH_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::configuration("VNPAY_HASH_SECRET environment variable is required")
            })?;
        let defaults = Self::default();

        Ok(Self {
            tmn_code,
            hash_secret,
            pay_url: std::env::var("VNPAY_PAY_URL").unwrap_or(defaults.pay_url),
            version: defaults.version,
            locale: std::env::var("VNPAY_LOCALE").unwrap_or(defaults.locale),
            order_type: std::env::var("VNPAY_ORDER_TYPE").unwrap_or(defaults.order_type),
            expire_minutes: std::env::var("VNPAY_EXPIRE_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(defaults.expire_minutes),
        })
    }
}

pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> PaymentResult<Self> {
        if config.hash_secret.trim().is_empty() || config.tmn_code.trim().is_empty() {
            return Err(PaymentError::configuration(
                "vnpay terminal code and hash secret are required",
            ));
        }
        validate_absolute_url(&config.pay_url, "VNPAY_PAY_URL")
            .map_err(|e| PaymentError::configuration(e.to_string()))?;
        info!(
            tmn_code = %mask_secret(&config.tmn_code),
            pay_url = %config.pay_url,
            "vnpay gateway configured"
        );
        Ok(Self { config })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(VnpayConfig::from_env()?)
    }

    /// VNPay timestamps are wall-clock time in Vietnam (GMT+7).
    fn vietnam_time(now: DateTime<Utc>) -> PaymentResult<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(7 * 3600)
            .ok_or_else(|| PaymentError::configuration("invalid GMT+7 offset"))?;
        Ok(now.with_timezone(&offset))
    }

    /// Builds the signed redirect URL for `request` as of `now`.
    pub fn build_payment_url(
        &self,
        request: &CreatePaymentRequest,
        now: DateTime<Utc>,
    ) -> PaymentResult<String> {
        let minor_amount = request
            .amount
            .checked_mul(100)
            .ok_or_else(|| PaymentError::validation("amount is too large", "amount"))?;
        let created = Self::vietnam_time(now)?;
        let expires = created + ChronoDuration::minutes(self.config.expire_minutes);

        let mut fields = BTreeMap::new();
        fields.insert("vnp_Version".to_string(), self.config.version.clone());
        fields.insert("vnp_Command".to_string(), "pay".to_string());
        fields.insert("vnp_TmnCode".to_string(), self.config.tmn_code.clone());
        fields.insert("vnp_Amount".to_string(), minor_amount.to_string());
        fields.insert("vnp_CurrCode".to_string(), "VND".to_string());
        fields.insert("vnp_TxnRef".to_string(), request.order_id.clone());
        fields.insert("vnp_OrderInfo".to_string(), request.order_info.clone());
        fields.insert("vnp_OrderType".to_string(), self.config.order_type.clone());
        fields.insert("vnp_Locale".to_string(), self.config.locale.clone());
        fields.insert("vnp_ReturnUrl".to_string(), request.return_url.clone());
        fields.insert(
            "vnp_IpAddr".to_string(),
            request
                .client_ip
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        );
        fields.insert(
            "vnp_CreateDate".to_string(),
            created.format(DATE_FORMAT).to_string(),
        );
        fields.insert(
            "vnp_ExpireDate".to_string(),
            expires.format(DATE_FORMAT).to_string(),
        );

        // The signed string doubles as the query string.
        let query = SCHEME.raw_data(&fields).map_err(|e| {
            PaymentError::configuration(format!("cannot canonicalize vnpay request: {}", e))
        })?;
        let secure_hash = SCHEME.sign(&fields, &self.config.hash_secret)?;

        Ok(format!(
            "{}?{}&{}={}",
            self.config.pay_url, query, SECURE_HASH, secure_hash
        ))
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<PaymentResponse> {
        request.validate()?;
        let payment_url = self.build_payment_url(&request, Utc::now())?;
        info!(order_id = %request.order_id, "vnpay payment url created");

        Ok(PaymentResponse {
            gateway: GatewayName::VnPay,
            order_id: request.order_id.clone(),
            request_id: request.order_id,
            amount: request.amount,
            payment_url,
            result_code: None,
            message: None,
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentResult<VerifiedCallback> {
        let secure_hash = required_field(&payload.params, GATEWAY, SECURE_HASH)?.to_string();

        let fields: BTreeMap<String, String> = payload
            .params
            .iter()
            .filter(|(k, _)| k.starts_with("vnp_") && *k != SECURE_HASH && *k != SECURE_HASH_TYPE)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let valid = SCHEME
            .verify(&fields, &secure_hash, &self.config.hash_secret)
            .map_err(|e| PaymentError::MalformedCallback {
                gateway: GATEWAY.to_string(),
                message: e.to_string(),
            })??;
        if !valid {
            return Err(PaymentError::SignatureInvalid {
                gateway: GATEWAY.to_string(),
            });
        }

        let order_id = required_field(&fields, GATEWAY, "vnp_TxnRef")?;
        let transaction_no = required_field(&fields, GATEWAY, "vnp_TransactionNo")?;
        let response_code = required_field(&fields, GATEWAY, "vnp_ResponseCode")?;
        let minor_amount = parse_amount(
            required_field(&fields, GATEWAY, "vnp_Amount")?,
            GATEWAY,
            "vnp_Amount",
        )?;
        if minor_amount % 100 != 0 {
            return Err(PaymentError::MalformedCallback {
                gateway: GATEWAY.to_string(),
                message: format!("vnp_Amount is not a whole VND amount: {}", minor_amount),
            });
        }

        let transaction_status = fields
            .get("vnp_TransactionStatus")
            .map(String::as_str)
            .unwrap_or(SUCCESS_CODE);
        let status = if response_code == SUCCESS_CODE && transaction_status == SUCCESS_CODE {
            CallbackStatus::Success
        } else {
            CallbackStatus::Failure
        };

        // VNPay reports transaction number 0 for payments that never reached
        // the bank, such as a customer cancel. Key those by order instead.
        let transaction_id = if transaction_no.trim() == "0" {
            format!("0-{}", order_id)
        } else {
            transaction_no.to_string()
        };

        Ok(VerifiedCallback {
            gateway: GatewayName::VnPay,
            transaction_id,
            order_id: order_id.to_string(),
            amount: minor_amount / 100,
            gateway_code: response_code.to_string(),
            status,
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::VnPay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::{encode, sign_with};
    use chrono::TimeZone;
    use url::Url;

    const SECRET: &str = "VNPAYTESTSECRETKEY0123456789ABCD";

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "ZENTRIX1".to_string(),
            hash_secret: SECRET.to_string(),
            ..VnpayConfig::default()
        })
        .expect("gateway init should succeed")
    }

    fn request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            order_id: "ORD-7".to_string(),
            amount: 100_000,
            order_info: "Thanh toan don hang ORD-7".to_string(),
            return_url: "https://shop.zentrix.vn/payment/vnpay-return".to_string(),
            client_ip: Some("10.0.0.8".to_string()),
        }
    }

    fn signed_callback(transaction_no: &str, response_code: &str) -> CallbackPayload {
        let pairs = [
            ("vnp_Amount", "10000000"),
            ("vnp_BankCode", "NCB"),
            ("vnp_OrderInfo", "Thanh toan don hang ORD-7"),
            ("vnp_PayDate", "20261019103000"),
            ("vnp_ResponseCode", response_code),
            ("vnp_TmnCode", "ZENTRIX1"),
            ("vnp_TransactionNo", transaction_no),
            ("vnp_TransactionStatus", response_code),
            ("vnp_TxnRef", "ORD-7"),
        ];
        let raw = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let hash = sign_with(SignatureAlgorithm::HmacSha512, &raw, SECRET).unwrap();
        CallbackPayload::from_pairs(pairs)
            .with(SECURE_HASH, hash.to_uppercase())
            .with(SECURE_HASH_TYPE, "HmacSHA512")
    }

    #[test]
    fn payment_url_is_signed_over_its_own_query() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 3, 30, 0).unwrap();
        let url = gateway().build_payment_url(&request(), now).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: BTreeMap<String, String> = parsed.query_pairs().into_owned().collect();

        assert_eq!(params["vnp_Amount"], "10000000");
        assert_eq!(params["vnp_CreateDate"], "20261019103000");
        assert_eq!(params["vnp_ExpireDate"], "20261019104500");
        assert_eq!(params["vnp_IpAddr"], "10.0.0.8");

        let (query, hash) = url
            .split_once('?')
            .and_then(|(_, q)| q.rsplit_once("&vnp_SecureHash="))
            .unwrap();
        assert_eq!(
            hash,
            sign_with(SignatureAlgorithm::HmacSha512, query, SECRET).unwrap()
        );
    }

    #[test]
    fn verify_callback_accepts_uppercase_hash_and_ignores_hash_type() {
        let verified = gateway()
            .verify_callback(&signed_callback("14226112", "00"))
            .expect("valid callback");
        assert_eq!(verified.transaction_id, "14226112");
        assert_eq!(verified.order_id, "ORD-7");
        assert_eq!(verified.amount, 100_000);
        assert_eq!(verified.status, CallbackStatus::Success);
    }

    #[test]
    fn cancelled_payment_is_a_failure_keyed_by_order() {
        let verified = gateway()
            .verify_callback(&signed_callback("0", "24"))
            .expect("valid callback");
        assert_eq!(verified.status, CallbackStatus::Failure);
        assert_eq!(verified.transaction_id, "0-ORD-7");
    }

    #[test]
    fn tampered_callback_is_rejected() {
        let payload = signed_callback("14226112", "00").with("vnp_Amount", "100");
        assert!(matches!(
            gateway().verify_callback(&payload),
            Err(PaymentError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn callback_without_hash_is_malformed() {
        let mut payload = signed_callback("14226112", "00");
        payload.params.remove(SECURE_HASH);
        assert!(matches!(
            gateway().verify_callback(&payload),
            Err(PaymentError::MalformedCallback { .. })
        ));
    }

    #[test]
    fn non_vnp_parameters_do_not_affect_verification() {
        let payload = signed_callback("14226112", "00").with("utm_source", "email");
        assert!(gateway().verify_callback(&payload).is_ok());
    }

    #[tokio::test]
    async fn create_payment_validates_request() {
        let mut bad = request();
        bad.amount = 0;
        assert!(matches!(
            gateway().create_payment(bad).await,
            Err(PaymentError::ValidationError { .. })
        ));
    }
}
