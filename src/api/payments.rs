use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use crate::api::{AppState, ResponseObject};
use crate::error::AppError;
use crate::middleware::error::tag_request;
use crate::payments::types::{CreatePaymentRequest, GatewayName};

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentBody {
    pub order_id: String,
    /// VND
    pub amount: u64,
    pub order_info: String,
    pub return_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentData {
    pub gateway: GatewayName,
    pub order_id: String,
    pub request_id: String,
    pub amount: u64,
    pub payment_url: String,
}

/// POST /api/payments/{gateway}
pub async fn create_payment(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Json<ResponseObject<PaymentData>>, AppError> {
    let gateway = GatewayName::from_str(&gateway).map_err(|e| tag_request(e, &headers))?;
    let client = state
        .registry
        .get(gateway)
        .map_err(|e| tag_request(e, &headers))?;

    let request = CreatePaymentRequest {
        order_id: body.order_id,
        amount: body.amount,
        order_info: body.order_info,
        return_url: body.return_url,
        client_ip: client_ip(&headers),
    };

    let response = client
        .create_payment(request)
        .await
        .map_err(|e| tag_request(e, &headers))?;

    info!(
        gateway = %gateway,
        order_id = %response.order_id,
        amount = response.amount,
        "payment created"
    );

    Ok(Json(ResponseObject::new(
        "OK",
        "Payment created",
        PaymentData {
            gateway: response.gateway,
            order_id: response.order_id,
            request_id: response.request_id,
            amount: response.amount,
            payment_url: response.payment_url,
        },
    )))
}

/// First hop in `x-forwarded-for`, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
