//! JSON body for every error a handler returns.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// Gateway the failure concerns, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            gateway: error.gateway().map(str::to_string),
            retryable: error.is_retryable(),
            context: error.context.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from(&self);

        if status.is_server_error() {
            tracing::error!(
                error = ?self.kind,
                code = ?body.error,
                gateway = ?body.gateway,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request failed"
            );
        } else {
            tracing::warn!(
                code = ?body.error,
                gateway = ?body.gateway,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request refused"
            );
        }

        (status, Json(body)).into_response()
    }
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Converts `err` and stamps it with the request id from `headers`.
pub fn tag_request(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match request_id(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
