//! HMAC signing over canonical `key=value&...` strings.
//!
//! Each gateway declares one [`SignatureScheme`] next to its client. The
//! scheme fixes the field order, value encoding and hash function, so the
//! outbound signer and the callback verifier can never drift apart.

use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::collections::BTreeMap;
use thiserror::Error;
use url::form_urlencoded::byte_serialize;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    HmacSha256,
    HmacSha512,
}

/// Signs `raw_data` with HMAC-SHA256 and returns lowercase hex.
pub fn sign(raw_data: &str, secret_key: &str) -> PaymentResult<String> {
    sign_with(SignatureAlgorithm::HmacSha256, raw_data, secret_key)
}

/// Constant-time HMAC-SHA256 check of a hex signature.
pub fn verify(raw_data: &str, signature: &str, secret_key: &str) -> PaymentResult<bool> {
    verify_with(SignatureAlgorithm::HmacSha256, raw_data, signature, secret_key)
}

pub fn sign_with(
    algorithm: SignatureAlgorithm,
    raw_data: &str,
    secret_key: &str,
) -> PaymentResult<String> {
    ensure_secret(secret_key)?;
    let bytes = match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
                .map_err(|e| PaymentError::configuration(format!("invalid HMAC key: {}", e)))?;
            mac.update(raw_data.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::HmacSha512 => {
            let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())
                .map_err(|e| PaymentError::configuration(format!("invalid HMAC key: {}", e)))?;
            mac.update(raw_data.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(hex::encode(bytes))
}

/// Hex decoding accepts either case. A signature that is not hex at all is
/// simply a mismatch.
pub fn verify_with(
    algorithm: SignatureAlgorithm,
    raw_data: &str,
    signature: &str,
    secret_key: &str,
) -> PaymentResult<bool> {
    ensure_secret(secret_key)?;
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };

    let valid = match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
                .map_err(|e| PaymentError::configuration(format!("invalid HMAC key: {}", e)))?;
            mac.update(raw_data.as_bytes());
            mac.verify_slice(&expected).is_ok()
        }
        SignatureAlgorithm::HmacSha512 => {
            let mut mac = HmacSha512::new_from_slice(secret_key.as_bytes())
                .map_err(|e| PaymentError::configuration(format!("invalid HMAC key: {}", e)))?;
            mac.update(raw_data.as_bytes());
            mac.verify_slice(&expected).is_ok()
        }
    };
    Ok(valid)
}

fn ensure_secret(secret_key: &str) -> PaymentResult<()> {
    if secret_key.trim().is_empty() {
        return Err(PaymentError::configuration(
            "signing secret is missing or empty",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalError {
    #[error("malformed signature key: {0:?}")]
    InvalidKey(String),
    #[error("missing signed field: {0}")]
    MissingField(String),
}

#[derive(Debug, Clone, Copy)]
pub enum KeyOrder {
    /// Exactly these keys, in this order. Every key must be present.
    Fixed(&'static [&'static str]),
    /// Every key in the field map, sorted by name.
    Sorted,
}

/// How a field map is turned into the string that gets signed.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalForm {
    pub order: KeyOrder,
    pub url_encode: bool,
    pub skip_empty: bool,
}

impl CanonicalForm {
    pub const fn fixed(keys: &'static [&'static str]) -> Self {
        Self {
            order: KeyOrder::Fixed(keys),
            url_encode: false,
            skip_empty: false,
        }
    }

    pub const fn sorted_url_encoded() -> Self {
        Self {
            order: KeyOrder::Sorted,
            url_encode: true,
            skip_empty: true,
        }
    }

    pub fn build(&self, fields: &BTreeMap<String, String>) -> Result<String, CanonicalError> {
        let mut parts = Vec::with_capacity(fields.len());
        match self.order {
            KeyOrder::Fixed(keys) => {
                for key in keys {
                    validate_key(key)?;
                    let value = fields
                        .get(*key)
                        .ok_or_else(|| CanonicalError::MissingField((*key).to_string()))?;
                    self.push(&mut parts, key, value);
                }
            }
            KeyOrder::Sorted => {
                // BTreeMap iterates in key order already.
                for (key, value) in fields {
                    validate_key(key)?;
                    self.push(&mut parts, key, value);
                }
            }
        }
        Ok(parts.join("&"))
    }

    fn push(&self, parts: &mut Vec<String>, key: &str, value: &str) {
        if self.skip_empty && value.is_empty() {
            return;
        }
        if self.url_encode {
            parts.push(format!("{}={}", encode(key), encode(value)));
        } else {
            parts.push(format!("{}={}", key, value));
        }
    }
}

fn validate_key(key: &str) -> Result<(), CanonicalError> {
    if key.is_empty()
        || key
            .chars()
            .any(|c| c == '=' || c == '&' || c.is_whitespace() || c.is_control())
    {
        return Err(CanonicalError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// `application/x-www-form-urlencoded` encoding, spaces as `+`.
pub fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// A gateway's complete signing contract.
#[derive(Debug, Clone, Copy)]
pub struct SignatureScheme {
    pub algorithm: SignatureAlgorithm,
    pub form: CanonicalForm,
}

impl SignatureScheme {
    pub fn raw_data(&self, fields: &BTreeMap<String, String>) -> Result<String, CanonicalError> {
        self.form.build(fields)
    }

    pub fn sign(&self, fields: &BTreeMap<String, String>, secret_key: &str) -> PaymentResult<String> {
        let raw = self.raw_data(fields).map_err(|e| match e {
            CanonicalError::InvalidKey(key) => {
                PaymentError::configuration(format!("malformed signature key: {:?}", key))
            }
            CanonicalError::MissingField(field) => PaymentError::ValidationError {
                message: format!("missing signed field: {}", field),
                field: Some(field),
            },
        })?;
        sign_with(self.algorithm, &raw, secret_key)
    }

    /// Returns `Ok(false)` on mismatch. Canonicalization problems come back
    /// as `Err(CanonicalError)` wrapped by the caller, since only the
    /// gateway knows how to describe a malformed callback.
    pub fn verify(
        &self,
        fields: &BTreeMap<String, String>,
        signature: &str,
        secret_key: &str,
    ) -> Result<PaymentResult<bool>, CanonicalError> {
        let raw = self.raw_data(fields)?;
        Ok(verify_with(self.algorithm, &raw, signature, secret_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sign_matches_known_hmac_sha256_vector() {
        // RFC 4231 test case 2
        let sig = sign("what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn sign_then_verify_round_trips_for_both_algorithms() {
        for algorithm in [SignatureAlgorithm::HmacSha256, SignatureAlgorithm::HmacSha512] {
            for (data, key) in [("", "k"), ("amount=1&orderId=A", "secret"), ("ư=đ", "khóa")] {
                let sig = sign_with(algorithm, data, key).unwrap();
                assert!(verify_with(algorithm, data, &sig, key).unwrap());
                assert!(verify_with(algorithm, data, &sig.to_uppercase(), key).unwrap());
            }
        }
    }

    #[test]
    fn verify_rejects_tampered_data_and_garbage() {
        let sig = sign("amount=100000", "secret").unwrap();
        assert!(!verify("amount=100001", &sig, "secret").unwrap());
        assert!(!verify("amount=100000", &sig, "other").unwrap());
        assert!(!verify("amount=100000", "not-hex", "secret").unwrap());
        assert!(!verify("amount=100000", &sig[..10], "secret").unwrap());
    }

    #[test]
    fn missing_secret_fails_fast() {
        assert!(matches!(
            sign("data", ""),
            Err(PaymentError::ConfigurationError { .. })
        ));
        assert!(matches!(
            verify("data", "00", "  "),
            Err(PaymentError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn fixed_form_uses_declared_order_not_map_order() {
        const ORDER: &[&str] = &["partnerCode", "amount", "orderId"];
        let form = CanonicalForm::fixed(ORDER);
        let raw = form
            .build(&fields(&[("amount", "10"), ("orderId", "A"), ("partnerCode", "P"), ("x", "y")]))
            .unwrap();
        assert_eq!(raw, "partnerCode=P&amount=10&orderId=A");
    }

    #[test]
    fn fixed_form_reports_missing_field() {
        const ORDER: &[&str] = &["amount", "orderId"];
        let err = CanonicalForm::fixed(ORDER)
            .build(&fields(&[("amount", "10")]))
            .unwrap_err();
        assert_eq!(err, CanonicalError::MissingField("orderId".to_string()));
    }

    #[test]
    fn sorted_form_encodes_values_and_skips_empty() {
        let raw = CanonicalForm::sorted_url_encoded()
            .build(&fields(&[
                ("vnp_OrderInfo", "Thanh toan don 1"),
                ("vnp_Amount", "10000000"),
                ("vnp_BankCode", ""),
                ("vnp_ReturnUrl", "https://a.vn/r?x=1"),
            ]))
            .unwrap();
        assert_eq!(
            raw,
            "vnp_Amount=10000000&vnp_OrderInfo=Thanh+toan+don+1&vnp_ReturnUrl=https%3A%2F%2Fa.vn%2Fr%3Fx%3D1"
        );
    }

    #[test]
    fn malformed_keys_are_rejected() {
        const BAD: &[&str] = &["amount", "order id"];
        assert!(matches!(
            CanonicalForm::fixed(BAD).build(&fields(&[("amount", "1"), ("order id", "2")])),
            Err(CanonicalError::InvalidKey(_))
        ));
        let scheme = SignatureScheme {
            algorithm: SignatureAlgorithm::HmacSha256,
            form: CanonicalForm::sorted_url_encoded(),
        };
        assert!(matches!(
            scheme.sign(&fields(&[("a=b", "1")]), "secret"),
            Err(PaymentError::ConfigurationError { .. })
        ));
    }
}
