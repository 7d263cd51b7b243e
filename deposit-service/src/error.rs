//! Error taxonomy for deposit-service.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepositError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service integration failure ({service}): {message}")]
    ServiceIntegration {
        service: &'static str,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type DepositResult<T> = Result<T, DepositError>;

impl DepositError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn integration(service: &'static str, message: impl Into<String>) -> Self {
        Self::ServiceIntegration {
            service,
            message: message.into(),
        }
    }

    pub fn is_service_integration(&self) -> bool {
        matches!(self, Self::ServiceIntegration { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ServiceIntegration { .. } => "service_integration",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage",
        }
    }
}

/// SQLSTATE deadlock_detected and serialization_failure.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40P01", "40001"];

fn is_retryable_sqlstate(code: &str) -> bool {
    RETRYABLE_SQLSTATES.contains(&code)
}

impl From<sqlx::Error> for DepositError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| is_retryable_sqlstate(&code));
        if retryable {
            DepositError::Conflict(err.to_string())
        } else {
            DepositError::Storage(err.to_string())
        }
    }
}

impl From<DepositError> for AppError {
    fn from(err: DepositError) -> Self {
        let message = err.to_string();
        match err {
            DepositError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(message)),
            DepositError::InvalidState(_) | DepositError::Conflict(_) => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
            DepositError::InsufficientBalance { .. } | DepositError::InvalidAmount(_) => {
                AppError::UnprocessableEntity(anyhow::anyhow!(message))
            }
            DepositError::InvalidRequest(_) => AppError::BadRequest(anyhow::anyhow!(message)),
            DepositError::ServiceIntegration { .. } => AppError::BadGateway(message),
            DepositError::Unauthorized(_) => AppError::Unauthorized(anyhow::anyhow!(message)),
            DepositError::Storage(_) => AppError::DatabaseError(anyhow::anyhow!(message)),
        }
    }
}
