//! Error handling for the Stock Ledger service
//!
//! Every error carries a stable machine code and a `retryable` flag so the
//! order flow can tell a transient conflict apart from a hard business
//! failure like insufficient stock.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate lot number: {0}")]
    DuplicateLotNumber(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Variance approval required: aggregate variance {variance_value} exceeds threshold {threshold}")]
    VarianceApprovalRequired {
        variance_value: Decimal,
        threshold: Decimal,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Whether retrying the same request can meaningfully succeed
    pub retryable: bool,
}

impl AppError {
    fn detail(&self) -> (StatusCode, ErrorDetail) {
        match self {
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail {
                    code: "NOT_FOUND".to_string(),
                    message: format!("{} not found", resource),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::DuplicateLotNumber(lot_number) => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "DUPLICATE_LOT_NUMBER".to_string(),
                    message: format!(
                        "A lot with number {} already exists for this product and branch",
                        lot_number
                    ),
                    field: Some("lot_number".to_string()),
                    retryable: false,
                },
            ),
            AppError::InvalidQuantity(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "INVALID_QUANTITY".to_string(),
                    message: msg.clone(),
                    field: Some("quantity".to_string()),
                    retryable: false,
                },
            ),
            AppError::InsufficientStock {
                requested,
                available,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    code: "INSUFFICIENT_STOCK".to_string(),
                    message: format!(
                        "Requested {} but only {} available across eligible lots",
                        requested, available
                    ),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "CONCURRENT_MODIFICATION".to_string(),
                    message: msg.clone(),
                    field: None,
                    retryable: true,
                },
            ),
            AppError::VarianceApprovalRequired {
                variance_value,
                threshold,
            } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    code: "VARIANCE_APPROVAL_REQUIRED".to_string(),
                    message: format!(
                        "Aggregate variance {} exceeds the approval threshold {}; resubmit with approval to post adjustments",
                        variance_value, threshold
                    ),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::InvalidStateTransition(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail {
                    code: "INVALID_STATE_TRANSITION".to_string(),
                    message: msg.clone(),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    code: "VALIDATION_ERROR".to_string(),
                    message: message.clone(),
                    field: Some(field.clone()),
                    retryable: false,
                },
            ),
            AppError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "CONFIGURATION_ERROR".to_string(),
                    message: format!("Configuration error: {}", msg),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "DATABASE_ERROR".to_string(),
                    message: "A database error occurred".to_string(),
                    field: None,
                    retryable: true,
                },
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message: msg.clone(),
                    field: None,
                    retryable: false,
                },
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message: "An internal server error occurred".to_string(),
                    field: None,
                    retryable: false,
                },
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = self.detail();

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request failed: {:?}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;
