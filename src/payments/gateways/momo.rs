use crate::logging::mask_secret;
use crate::middleware::logging::log_external_call;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::signature::{
    CanonicalError, CanonicalForm, SignatureAlgorithm, SignatureScheme,
};
use crate::payments::types::{
    CallbackPayload, CallbackStatus, CreatePaymentRequest, GatewayName, PaymentResponse,
    VerifiedCallback,
};
use crate::payments::utils::{parse_amount, required_field, PaymentHttpClient, MAX_RETRIES};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const GATEWAY: &str = "momo";

const CREATE_SIGNATURE_KEYS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "ipnUrl",
    "orderId",
    "orderInfo",
    "partnerCode",
    "redirectUrl",
    "requestId",
    "requestType",
];

const CALLBACK_SIGNATURE_KEYS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

pub const CREATE_SCHEME: SignatureScheme = SignatureScheme {
    algorithm: SignatureAlgorithm::HmacSha256,
    form: CanonicalForm::fixed(CREATE_SIGNATURE_KEYS),
};

pub const CALLBACK_SCHEME: SignatureScheme = SignatureScheme {
    algorithm: SignatureAlgorithm::HmacSha256,
    form: CanonicalForm::fixed(CALLBACK_SIGNATURE_KEYS),
};

/// `resultCode` values MoMo reports for a paid transaction. 9000 is an
/// authorized payment awaiting capture.
const SUCCESS_CODES: &[&str] = &["0", "9000"];

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub ipn_url: String,
    pub request_type: String,
    pub lang: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            partner_code: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: "https://test-payment.momo.vn".to_string(),
            ipn_url: String::new(),
            request_type: "captureWallet".to_string(),
            lang: "vi".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl MomoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    PaymentError::configuration(format!(
                        "{} environment variable is required",
                        key
                    ))
                })
        };
        let defaults = Self::default();

        Ok(Self {
            partner_code: required("MOMO_PARTNER_CODE")?,
            access_key: required("MOMO_ACCESS_KEY")?,
            secret_key: required("MOMO_SECRET_KEY")?,
            ipn_url: required("MOMO_IPN_URL")?,
            endpoint: std::env::var("MOMO_ENDPOINT").unwrap_or(defaults.endpoint),
            request_type: std::env::var("MOMO_REQUEST_TYPE").unwrap_or(defaults.request_type),
            lang: std::env::var("MOMO_LANG").unwrap_or(defaults.lang),
            timeout_secs: std::env::var("MOMO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("MOMO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries)
                .min(MAX_RETRIES),
        })
    }
}

pub struct MomoGateway {
    config: MomoConfig,
    http: PaymentHttpClient,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> PaymentResult<Self> {
        if config.secret_key.trim().is_empty() || config.access_key.trim().is_empty() {
            return Err(PaymentError::configuration(
                "momo access key and secret key are required",
            ));
        }
        let http = PaymentHttpClient::new(
            GATEWAY,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        info!(
            partner_code = %mask_secret(&config.partner_code),
            endpoint = %config.endpoint,
            "momo gateway configured"
        );
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MomoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Builds the signed creation body. The signature is computed once here
    /// and sent as-is.
    pub fn build_request(
        &self,
        request: &CreatePaymentRequest,
        request_id: &str,
    ) -> PaymentResult<MomoCreateRequest> {
        let extra_data = String::new();
        let mut fields = BTreeMap::new();
        fields.insert("accessKey".to_string(), self.config.access_key.clone());
        fields.insert("amount".to_string(), request.amount.to_string());
        fields.insert("extraData".to_string(), extra_data.clone());
        fields.insert("ipnUrl".to_string(), self.config.ipn_url.clone());
        fields.insert("orderId".to_string(), request.order_id.clone());
        fields.insert("orderInfo".to_string(), request.order_info.clone());
        fields.insert("partnerCode".to_string(), self.config.partner_code.clone());
        fields.insert("redirectUrl".to_string(), request.return_url.clone());
        fields.insert("requestId".to_string(), request_id.to_string());
        fields.insert("requestType".to_string(), self.config.request_type.clone());

        let signature = CREATE_SCHEME.sign(&fields, &self.config.secret_key)?;

        Ok(MomoCreateRequest {
            partner_code: self.config.partner_code.clone(),
            request_id: request_id.to_string(),
            amount: request.amount,
            order_id: request.order_id.clone(),
            order_info: request.order_info.clone(),
            redirect_url: request.return_url.clone(),
            ipn_url: self.config.ipn_url.clone(),
            request_type: self.config.request_type.clone(),
            extra_data,
            lang: self.config.lang.clone(),
            signature,
        })
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<PaymentResponse> {
        request.validate()?;
        let request_id = Uuid::new_v4().to_string();
        let body = self.build_request(&request, &request_id)?;

        let url = self.endpoint("/v2/gateway/api/create");
        let raw: MomoCreateResponse =
            log_external_call(GATEWAY, "create_payment", self.http.post_json(&url, &body)).await?;

        if raw.result_code != 0 {
            warn!(
                order_id = %request.order_id,
                result_code = raw.result_code,
                message = %raw.message,
                "momo rejected payment creation"
            );
            return Err(PaymentError::GatewayRejected {
                gateway: GATEWAY.to_string(),
                message: raw.message,
                gateway_code: Some(raw.result_code.to_string()),
            });
        }

        let payment_url = raw
            .pay_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PaymentError::GatewayRejected {
                gateway: GATEWAY.to_string(),
                message: "momo response did not include payUrl".to_string(),
                gateway_code: Some(raw.result_code.to_string()),
            })?;

        info!(order_id = %request.order_id, request_id = %request_id, "momo payment created");

        Ok(PaymentResponse {
            gateway: GatewayName::MoMo,
            order_id: raw.order_id,
            request_id: raw.request_id,
            amount: raw.amount,
            payment_url,
            result_code: Some(raw.result_code.to_string()),
            message: Some(raw.message),
        })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentResult<VerifiedCallback> {
        let signature = required_field(&payload.params, GATEWAY, "signature")?.to_string();

        // accessKey is part of the signed string but never sent back.
        let mut fields = payload.params.clone();
        fields.insert("accessKey".to_string(), self.config.access_key.clone());

        let valid = CALLBACK_SCHEME
            .verify(&fields, &signature, &self.config.secret_key)
            .map_err(malformed)??;
        if !valid {
            return Err(PaymentError::SignatureInvalid {
                gateway: GATEWAY.to_string(),
            });
        }

        let transaction_id = required_field(&fields, GATEWAY, "transId")?;
        let order_id = required_field(&fields, GATEWAY, "orderId")?;
        let amount = parse_amount(required_field(&fields, GATEWAY, "amount")?, GATEWAY, "amount")?;
        let result_code = required_field(&fields, GATEWAY, "resultCode")?.trim();

        let status = if SUCCESS_CODES.contains(&result_code) {
            CallbackStatus::Success
        } else {
            CallbackStatus::Failure
        };

        Ok(VerifiedCallback {
            gateway: GatewayName::MoMo,
            transaction_id: transaction_id.to_string(),
            order_id: order_id.to_string(),
            amount,
            gateway_code: result_code.to_string(),
            status,
        })
    }

    fn name(&self) -> GatewayName {
        GatewayName::MoMo
    }
}

fn malformed(err: CanonicalError) -> PaymentError {
    PaymentError::MalformedCallback {
        gateway: GATEWAY.to_string(),
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomoCreateRequest {
    pub partner_code: String,
    pub request_id: String,
    pub amount: u64,
    pub order_id: String,
    pub order_info: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub extra_data: String,
    pub lang: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    amount: u64,
    #[serde(default)]
    message: String,
    result_code: i64,
    #[serde(default)]
    pay_url: Option<String>,
}
