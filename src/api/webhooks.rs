use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

use crate::api::{AppState, ResponseObject};
use crate::error::AppError;
use crate::middleware::error::tag_request;
use crate::payments::types::{CallbackPayload, GatewayName};
use crate::services::reconciler::{
    ReconcileError, ReconciliationOutcome, ReconciliationStatus, RejectionReason,
};

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeData {
    pub gateway: GatewayName,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectionReason>,
}

impl From<&ReconciliationOutcome> for OutcomeData {
    fn from(outcome: &ReconciliationOutcome) -> Self {
        Self {
            gateway: outcome.gateway,
            transaction_id: outcome.transaction_id.clone(),
            order_id: outcome.order_id.clone(),
            amount: outcome.amount,
            reason: match outcome.status {
                ReconciliationStatus::Rejected(reason) => Some(reason),
                _ => None,
            },
        }
    }
}

/// Reply shape VNPay expects from an IPN endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VnpayIpnReply {
    #[serde(rename = "RspCode")]
    pub rsp_code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl VnpayIpnReply {
    fn new(code: &str, message: &str) -> Self {
        Self {
            rsp_code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn from_result(result: &Result<ReconciliationOutcome, ReconcileError>) -> Self {
        match result {
            Ok(outcome) => match outcome.status {
                ReconciliationStatus::Success | ReconciliationStatus::Failure => {
                    Self::new("00", "Confirm Success")
                }
                ReconciliationStatus::DuplicateIgnored if outcome.in_flight => {
                    Self::new("99", "Transaction in progress")
                }
                ReconciliationStatus::DuplicateIgnored => {
                    Self::new("02", "Order already confirmed")
                }
                ReconciliationStatus::Rejected(RejectionReason::SignatureInvalid) => {
                    Self::new("97", "Invalid signature")
                }
                ReconciliationStatus::Rejected(RejectionReason::MalformedCallback) => {
                    Self::new("99", "Malformed request")
                }
            },
            // anything but 00/02 makes VNPay retry
            Err(_) => Self::new("99", "Unknown error"),
        }
    }
}

fn outcome_response(outcome: ReconciliationOutcome) -> Response {
    let data = OutcomeData::from(&outcome);
    let (status, message) = match outcome.status {
        ReconciliationStatus::Success => (StatusCode::OK, "Payment confirmed"),
        ReconciliationStatus::Failure => (StatusCode::OK, "Payment failed"),
        ReconciliationStatus::DuplicateIgnored => (StatusCode::OK, "Callback already processed"),
        ReconciliationStatus::Rejected(RejectionReason::SignatureInvalid) => {
            (StatusCode::BAD_REQUEST, "Invalid payment signature")
        }
        ReconciliationStatus::Rejected(RejectionReason::MalformedCallback) => {
            (StatusCode::BAD_REQUEST, "Malformed payment callback")
        }
    };
    (
        status,
        Json(ResponseObject::new(outcome.status.as_str(), message, data)),
    )
        .into_response()
}

/// GET /api/payments/{gateway}/callback
///
/// Where the gateway sends the user back after paying. Reconciled like an
/// IPN, so whichever of the two arrives first applies the outcome.
pub async fn handle_return(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let gateway = GatewayName::from_str(&gateway).map_err(|e| tag_request(e, &headers))?;
    info!(gateway = %gateway, "payment return callback received");

    let outcome = state
        .reconciler
        .reconcile(gateway, CallbackPayload::from_pairs(params))
        .await
        .map_err(|e| tag_request(e, &headers))?;

    Ok(outcome_response(outcome))
}

/// GET /api/payments/vnpay/ipn
pub async fn vnpay_ipn(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if gateway != GatewayName::VnPay.as_str() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let result = state
        .reconciler
        .reconcile(GatewayName::VnPay, CallbackPayload::from_pairs(params))
        .await;
    if let Err(e) = &result {
        warn!(error = %e, "vnpay ipn could not be reconciled");
    }

    Json(VnpayIpnReply::from_result(&result)).into_response()
}

/// POST /api/payments/momo/ipn
pub async fn momo_ipn(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Response, AppError> {
    if gateway != GatewayName::MoMo.as_str() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let payload = CallbackPayload::from_json(&body).map_err(|e| tag_request(e, &headers))?;
    let outcome = state
        .reconciler
        .reconcile(GatewayName::MoMo, payload)
        .await
        .map_err(|e| tag_request(e, &headers))?;

    if outcome.is_rejected() {
        return Ok(outcome_response(outcome));
    }
    if outcome.in_flight {
        // MoMo redelivers on any non-2xx
        let data = OutcomeData::from(&outcome);
        return Ok((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ResponseObject::new(
                "IN_PROGRESS",
                "Transaction is still being applied",
                data,
            )),
        )
            .into_response());
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
