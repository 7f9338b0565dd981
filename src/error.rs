//! Application-wide error type
//!
//! Module errors (`PaymentError`, `LedgerError`, `ReconcileError`,
//! `DatabaseError`) convert into [`AppError`], which carries the HTTP
//! status, a stable error code and a message safe to show to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_UPDATE_FAILED")]
    OrderUpdateFailed,

    // Callback / request validation (4xx)
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "MALFORMED_CALLBACK")]
    MalformedCallback,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CACHE_ERROR")]
    CacheError,
    #[serde(rename = "LEDGER_ERROR")]
    LedgerError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "PAYMENT_GATEWAY_UNAVAILABLE")]
    PaymentGatewayUnavailable,
    #[serde(rename = "PAYMENT_GATEWAY_REJECTED")]
    PaymentGatewayRejected,

    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Order-side business errors
#[derive(Debug, Clone)]
pub enum DomainError {
    OrderNotFound { order_id: String },
    /// The order store refused or failed the status update
    OrderUpdateFailed { order_id: String, reason: String },
}

/// Infrastructure-level errors (database, cache, ledger, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Cache { message: String },
    /// Dedup ledger unreachable or full. Callbacks fail closed.
    Ledger { message: String },
    Configuration { message: String },
}

/// Payment gateway errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    MissingField { field: String },
    InvalidSignature { gateway: String },
    MalformedCallback { gateway: String, message: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderUpdateFailed { .. } => 500,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                if *is_retryable {
                    503
                } else {
                    502
                }
            }
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderUpdateFailed { .. } => ErrorCode::OrderUpdateFailed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Cache { .. } => ErrorCode::CacheError,
                InfrastructureError::Ledger { .. } => ErrorCode::LedgerError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                if *is_retryable {
                    ErrorCode::PaymentGatewayUnavailable
                } else {
                    ErrorCode::PaymentGatewayRejected
                }
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                ValidationError::MalformedCallback { .. } => ErrorCode::MalformedCallback,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_id } => {
                    format!("Order '{}' not found", order_id)
                }
                DomainError::OrderUpdateFailed { order_id, .. } => {
                    format!("Payment for order '{}' could not be recorded yet", order_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(ExternalError::PaymentGateway {
                gateway,
                is_retryable,
                ..
            }) => {
                if *is_retryable {
                    format!(
                        "Payment gateway ({}) is temporarily unavailable. Please try again",
                        gateway
                    )
                } else {
                    format!("Payment gateway ({}) rejected the request", gateway)
                }
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid field '{}': {}", field, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidSignature { .. } => {
                    "Invalid payment signature".to_string()
                }
                ValidationError::MalformedCallback { message, .. } => {
                    format!("Malformed payment callback: {}", message)
                }
            },
        }
    }

    /// Gateway named by the error, if any
    pub fn gateway(&self) -> Option<&str> {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentGateway { gateway, .. })
            | AppErrorKind::Validation(ValidationError::InvalidSignature { gateway })
            | AppErrorKind::Validation(ValidationError::MalformedCallback { gateway, .. }) => {
                Some(gateway)
            }
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::OrderUpdateFailed { .. }),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Cache { .. } => true,
                InfrastructureError::Ledger { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(ExternalError::PaymentGateway { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError>, From<PaymentError> and From<ReconcileError> live next
// to those types.

impl From<crate::ledger::LedgerError> for AppError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Ledger {
            message: err.to_string(),
        }))
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
