//! HTTP surface: payment creation, gateway callbacks and health.

pub mod payments;
pub mod webhooks;

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::payments::factory::GatewayRegistry;
use crate::services::reconciler::CallbackReconciler;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub registry: GatewayRegistry,
    pub reconciler: Arc<CallbackReconciler>,
    pub health_checker: HealthChecker,
}

/// Envelope for successful responses and callback outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject<T> {
    pub status: String,
    pub message: String,
    pub data: T,
}

impl<T> ResponseObject<T> {
    pub fn new(status: impl Into<String>, message: impl Into<String>, data: T) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            data,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .route("/api/payments/{gateway}", post(payments::create_payment))
        .route(
            "/api/payments/{gateway}/callback",
            get(webhooks::handle_return),
        )
        .route(
            "/api/payments/{gateway}/ipn",
            get(webhooks::vnpay_ipn).post(webhooks::momo_ipn),
        )
        .with_state(state)
}

async fn root() -> &'static str {
    "Zentrix payments"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = state.health_checker.check_health().await;
    if status.status == HealthState::Unhealthy {
        error!("health check failed, service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    } else {
        Ok(Json(status))
    }
}

async fn liveness() -> &'static str {
    "OK"
}
