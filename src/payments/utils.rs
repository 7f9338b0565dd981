use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Retries beyond this are ignored.
pub const MAX_RETRIES: u32 = 5;

const BASE_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Exponential backoff before retry number `attempt + 1`, capped.
pub fn backoff(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS
        .checked_shl(attempt)
        .unwrap_or(MAX_BACKOFF_MS)
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(gateway: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::configuration(format!("failed to initialize HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            gateway,
            timeout,
            max_retries: max_retries.min(MAX_RETRIES),
        })
    }

    fn unavailable(&self, error: &reqwest::Error, stage: &str) -> PaymentError {
        let message = if error.is_timeout() {
            format!("gateway {} timed out after {:?}", stage, self.timeout)
        } else {
            format!("gateway {} failed: {}", stage, error)
        };
        PaymentError::GatewayUnavailable {
            gateway: self.gateway.to_string(),
            message,
        }
    }

    /// POSTs a JSON body and decodes a JSON response.
    ///
    /// Transport failures (sending or reading the body), timeouts and 5xx
    /// responses are retried with exponential backoff and end as
    /// `GatewayUnavailable`. Any other non-success status, or a complete
    /// body that does not decode, is `GatewayRejected`.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let response = self
                .client
                .post(url)
                .timeout(self.timeout)
                .json(body)
                .send()
                .await;

            let failure = match response {
                Ok(resp) => {
                    let status = resp.status();
                    match resp.text().await {
                        Ok(text) if status.is_success() => {
                            return serde_json::from_str::<T>(&text).map_err(|e| {
                                PaymentError::GatewayRejected {
                                    gateway: self.gateway.to_string(),
                                    message: format!("invalid gateway JSON response: {}", e),
                                    gateway_code: None,
                                }
                            });
                        }
                        Ok(text) if status.is_server_error() => {
                            warn!(
                                gateway = self.gateway,
                                status = %status,
                                attempt = attempt + 1,
                                "gateway server error"
                            );
                            PaymentError::GatewayUnavailable {
                                gateway: self.gateway.to_string(),
                                message: format!("HTTP {}: {}", status, text),
                            }
                        }
                        Ok(text) => {
                            return Err(PaymentError::GatewayRejected {
                                gateway: self.gateway.to_string(),
                                message: format!("HTTP {}: {}", status, text),
                                gateway_code: Some(status.as_u16().to_string()),
                            });
                        }
                        Err(e) => {
                            let err = self.unavailable(&e, "response read");
                            warn!(
                                gateway = self.gateway,
                                status = %status,
                                attempt = attempt + 1,
                                error = %err,
                                "gateway response body lost"
                            );
                            err
                        }
                    }
                }
                Err(e) => {
                    let err = self.unavailable(&e, "request");
                    warn!(
                        gateway = self.gateway,
                        attempt = attempt + 1,
                        error = %err,
                        "gateway transport error"
                    );
                    err
                }
            };

            last_error = Some(failure);
            if attempt < self.max_retries {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_error.unwrap_or(PaymentError::GatewayUnavailable {
            gateway: self.gateway.to_string(),
            message: "gateway request failed".to_string(),
        }))
    }
}

/// Reads a required field from a flattened callback.
pub fn required_field<'a>(
    params: &'a std::collections::BTreeMap<String, String>,
    gateway: &str,
    key: &str,
) -> PaymentResult<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::MalformedCallback {
            gateway: gateway.to_string(),
            message: format!("missing required field: {}", key),
        })
}

pub fn parse_amount(value: &str, gateway: &str, key: &str) -> PaymentResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| PaymentError::MalformedCallback {
            gateway: gateway.to_string(),
            message: format!("{} is not a valid amount: {}", key, value),
        })
}
