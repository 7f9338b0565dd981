//! MoMo payment creation against a mocked MoMo endpoint.

mod common;

use common::{momo_config, momo_gateway};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zentrix_payments::payments::error::PaymentError;
use zentrix_payments::payments::gateway::PaymentGateway;
use zentrix_payments::payments::gateways::{MomoConfig, MomoGateway};
use zentrix_payments::payments::types::{CreatePaymentRequest, GatewayName};

fn request() -> CreatePaymentRequest {
    CreatePaymentRequest {
        order_id: "ORD-100".to_string(),
        amount: 100_000,
        order_info: "Thanh toan don hang ORD-100".to_string(),
        return_url: "https://shop.zentrix.vn/payment/return".to_string(),
        client_ip: None,
    }
}

#[tokio::test]
async fn create_payment_returns_pay_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .and(body_partial_json(json!({
            "partnerCode": common::MOMO_PARTNER,
            "orderId": "ORD-100",
            "amount": 100000,
            "requestType": "captureWallet"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "partnerCode": common::MOMO_PARTNER,
            "orderId": "ORD-100",
            "requestId": "b0b5c8d4",
            "amount": 100000,
            "responseTime": 1760844600000u64,
            "message": "Thành công.",
            "resultCode": 0,
            "payUrl": "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = momo_gateway(&server.uri())
        .create_payment(request())
        .await
        .unwrap();
    assert_eq!(response.gateway, GatewayName::MoMo);
    assert_eq!(response.order_id, "ORD-100");
    assert_eq!(response.amount, 100_000);
    assert_eq!(
        response.payment_url,
        "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
    );
    assert_eq!(response.result_code.as_deref(), Some("0"));
}

#[tokio::test]
async fn nonzero_result_code_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orderId": "ORD-100",
            "requestId": "b0b5c8d4",
            "amount": 100000,
            "message": "Giao dịch bị từ chối.",
            "resultCode": 42
        })))
        .mount(&server)
        .await;

    let err = momo_gateway(&server.uri())
        .create_payment(request())
        .await
        .unwrap_err();
    match err {
        PaymentError::GatewayRejected { gateway_code, .. } => {
            assert_eq!(gateway_code.as_deref(), Some("42"))
        }
        other => panic!("expected GatewayRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn server_errors_are_retried_then_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = MomoGateway::new(common::momo_config_with_retries(&server.uri(), 1)).unwrap();
    let err = gateway.create_payment(request()).await.unwrap_err();
    assert!(matches!(err, PaymentError::GatewayUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn slow_gateway_times_out_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "resultCode": 0, "payUrl": "https://late" }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let gateway = MomoGateway::new(MomoConfig {
        timeout_secs: 1,
        ..momo_config(&server.uri())
    })
    .unwrap();

    let started = Instant::now();
    let err = gateway.create_payment(request()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    match &err {
        PaymentError::GatewayUnavailable { message, .. } => {
            assert!(message.contains("timed out"), "{}", message)
        }
        other => panic!("expected GatewayUnavailable, got {:?}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/gateway/api/create"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = MomoGateway::new(common::momo_config_with_retries(&server.uri(), 2)).unwrap();
    let err = gateway.create_payment(request()).await.unwrap_err();
    assert!(matches!(err, PaymentError::GatewayRejected { .. }));
}

#[tokio::test]
async fn invalid_request_never_reaches_momo() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut bad = request();
    bad.amount = 0;
    let err = MomoGateway::new(momo_config(&server.uri()))
        .unwrap()
        .create_payment(bad)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::ValidationError { .. }));
}
