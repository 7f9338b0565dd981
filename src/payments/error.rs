use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid callback signature: gateway={gateway}")]
    SignatureInvalid { gateway: String },

    #[error("Malformed callback: gateway={gateway}, message={message}")]
    MalformedCallback { gateway: String, message: String },

    #[error("Gateway unavailable: gateway={gateway}, message={message}")]
    GatewayUnavailable { gateway: String, message: String },

    #[error("Gateway rejected request: gateway={gateway}, message={message}")]
    GatewayRejected {
        gateway: String,
        message: String,
        gateway_code: Option<String>,
    },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        PaymentError::ConfigurationError {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::SignatureInvalid { .. } => false,
            PaymentError::MalformedCallback { .. } => false,
            PaymentError::GatewayUnavailable { .. } => true,
            PaymentError::GatewayRejected { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::SignatureInvalid { .. } => 401,
            PaymentError::MalformedCallback { .. } => 400,
            PaymentError::GatewayUnavailable { .. } => 503,
            PaymentError::GatewayRejected { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ConfigurationError { .. } => {
                "Payment gateway is not configured".to_string()
            }
            PaymentError::SignatureInvalid { .. } => "Invalid payment signature".to_string(),
            PaymentError::MalformedCallback { .. } => {
                "Payment callback is missing required fields".to_string()
            }
            PaymentError::GatewayUnavailable { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::GatewayRejected { .. } => {
                "Payment gateway rejected the request".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError};

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::ConfigurationError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration { message })
            }
            PaymentError::SignatureInvalid { gateway } => {
                AppErrorKind::Validation(ValidationError::InvalidSignature { gateway })
            }
            PaymentError::MalformedCallback { gateway, message } => {
                AppErrorKind::Validation(ValidationError::MalformedCallback { gateway, message })
            }
            PaymentError::GatewayUnavailable { gateway, message } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway,
                    message,
                    is_retryable: true,
                })
            }
            PaymentError::GatewayRejected {
                gateway, message, ..
            } => AppErrorKind::External(ExternalError::PaymentGateway {
                gateway,
                message,
                is_retryable: false,
            }),
        };

        AppError::new(kind)
    }
}
