//! Error types for the auto-pay service
//!
//! `PaymentError` is raised by the store, gateway and payment handler.
//! `ApiError` is what the HTTP layer renders: a status code plus a
//! `{success: false, error: {code, message}}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Domain errors raised while processing a scheduled payment
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Transfer gateway error: {0}")]
    Gateway(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Payment already processed")]
    AlreadyPaid,

    #[error("Payment already has a transfer: {transfer_id}")]
    AlreadyTransferred { transfer_id: String },

    #[error("Missing bank connection: {0}")]
    MissingFundingSource(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Trust engine error: {0}")]
    Trust(String),
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PaymentError::NotFound("Row".to_string()),
            other => PaymentError::Ledger(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        PaymentError::Gateway(err.to_string())
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors returned by the HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// The installment was already handed to the gateway; the id is echoed
    /// back so the caller can reconcile
    #[error("Payment already has a transfer")]
    AlreadyTransferred { transfer_id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
}

impl ApiError {
    /// Status code and machine-readable code for this error
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) | ApiError::AlreadyTransferred { .. } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code, "Request failed");
        } else {
            tracing::debug!(error = %message, code, "Request rejected");
        }

        let transfer_id = match self {
            ApiError::AlreadyTransferred { transfer_id } => Some(transfer_id),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message,
                transfer_id,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::AlreadyTransferred { transfer_id } => {
                ApiError::AlreadyTransferred { transfer_id }
            }
            PaymentError::Validation(msg) => ApiError::BadRequest(msg),
            PaymentError::AlreadyPaid | PaymentError::MissingFundingSource(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PaymentError::NotFound(what) => ApiError::NotFound(what),
            PaymentError::Ledger(_)
            | PaymentError::Gateway(_)
            | PaymentError::Notification(_)
            | PaymentError::Trust(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
