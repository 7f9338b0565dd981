use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GatewayName {
    #[serde(rename = "vnpay")]
    VnPay,
    #[serde(rename = "momo")]
    MoMo,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::VnPay => "vnpay",
            GatewayName::MoMo => "momo",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "vnpay" => Ok(GatewayName::VnPay),
            "momo" => Ok(GatewayName::MoMo),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// A request to open a payment with a gateway for one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
    /// Amount in VND. Gateways that expect minor units scale it themselves.
    pub amount: u64,
    pub order_info: String,
    pub return_url: String,
    #[serde(default)]
    pub client_ip: Option<String>,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount == 0 {
            return Err(PaymentError::validation(
                "amount must be greater than zero",
                "amount",
            ));
        }
        if self.order_id.trim().is_empty() {
            return Err(PaymentError::validation("order_id is required", "order_id"));
        }
        if self.order_info.trim().is_empty() {
            return Err(PaymentError::validation(
                "order_info is required",
                "order_info",
            ));
        }
        validate_absolute_url(&self.return_url, "return_url")
    }
}

pub fn validate_absolute_url(value: &str, field: &str) -> Result<(), PaymentError> {
    let parsed = Url::parse(value).map_err(|e| {
        PaymentError::validation(format!("{} is not a valid URL: {}", field, e), field)
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(PaymentError::validation(
            format!("{} must be an absolute http(s) URL", field),
            field,
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub gateway: GatewayName,
    pub order_id: String,
    pub request_id: String,
    pub amount: u64,
    pub payment_url: String,
    pub result_code: Option<String>,
    pub message: Option<String>,
}

/// Raw callback parameters as received from a gateway.
///
/// Both query strings and JSON bodies are flattened into string pairs so
/// that signature verification sees exactly what the gateway signed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub params: BTreeMap<String, String>,
}

impl CallbackPayload {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Flattens a JSON object body. Nested values are kept as their JSON text.
    pub fn from_json(value: &JsonValue) -> Result<Self, PaymentError> {
        let object = value.as_object().ok_or(PaymentError::MalformedCallback {
            gateway: "unknown".to_string(),
            message: "callback body must be a JSON object".to_string(),
        })?;

        let params = object
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let text = match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect();
        Ok(Self { params })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Failure,
}

/// A callback whose signature has been checked against the gateway secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub gateway: GatewayName,
    pub transaction_id: String,
    pub order_id: String,
    /// Amount in VND.
    pub amount: u64,
    pub gateway_code: String,
    pub status: CallbackStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            order_id: "ORD-1".to_string(),
            amount: 100_000,
            order_info: "Thanh toan don hang ORD-1".to_string(),
            return_url: "https://shop.zentrix.vn/payment/return".to_string(),
            client_ip: None,
        }
    }

    #[test]
    fn gateway_name_parsing_works() {
        assert_eq!(GatewayName::from_str("VNPay").unwrap(), GatewayName::VnPay);
        assert_eq!(GatewayName::from_str(" momo ").unwrap(), GatewayName::MoMo);
        assert!(GatewayName::from_str("paypal").is_err());
    }

    #[test]
    fn create_request_rejects_zero_amount() {
        let mut req = request();
        req.amount = 0;
        assert!(matches!(
            req.validate(),
            Err(PaymentError::ValidationError { field: Some(f), .. }) if f == "amount"
        ));
    }

    #[test]
    fn create_request_requires_absolute_return_url() {
        let mut req = request();
        req.return_url = "/payment/return".to_string();
        assert!(req.validate().is_err());
        req.return_url = "ftp://shop.zentrix.vn/return".to_string();
        assert!(req.validate().is_err());
        assert!(request().validate().is_ok());
    }

    #[test]
    fn callback_payload_flattens_json_scalars() {
        let body = serde_json::json!({
            "orderId": "ORD-1",
            "amount": 100000,
            "resultCode": 0,
            "extraData": "",
            "ignored": null
        });
        let payload = CallbackPayload::from_json(&body).expect("object body");
        assert_eq!(payload.get("amount"), Some("100000"));
        assert_eq!(payload.get("resultCode"), Some("0"));
        assert_eq!(payload.get("extraData"), Some(""));
        assert_eq!(payload.get("ignored"), None);
    }

    #[test]
    fn callback_payload_rejects_non_object_json() {
        assert!(CallbackPayload::from_json(&serde_json::json!([1, 2])).is_err());
    }
}
