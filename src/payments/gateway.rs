use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackPayload, CreatePaymentRequest, GatewayName, PaymentResponse, VerifiedCallback,
};
use async_trait::async_trait;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Builds and signs a payment request and returns a URL the user can be
    /// redirected to.
    async fn create_payment(&self, request: CreatePaymentRequest)
        -> PaymentResult<PaymentResponse>;

    /// Checks the callback signature and extracts the fields the reconciler
    /// needs. Returns `SignatureInvalid` or `MalformedCallback` for bad input.
    fn verify_callback(&self, payload: &CallbackPayload) -> PaymentResult<VerifiedCallback>;

    fn name(&self) -> GatewayName;

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["VND"]
    }
}
