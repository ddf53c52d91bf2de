// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Missing required fields: {0:?}")]
    MissingFields(Vec<String>),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server configuration error: Missing M-Pesa credentials")]
    MissingConfig(Vec<String>),

    #[error("M-Pesa authentication failed: {0}")]
    MpesaAuth(String),

    #[error("M-Pesa API error: {status} - {body}")]
    MpesaApi { status: u16, body: String },

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Payment request not found")]
    PaymentRequestNotFound,

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::MissingFields(_) => (StatusCode::BAD_REQUEST, "All fields are required".to_string()),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation failed".to_string()),
            AppError::MissingConfig(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error: Missing M-Pesa credentials".to_string())
            }
            AppError::MpesaAuth(_) => (StatusCode::BAD_GATEWAY, "M-Pesa authentication failed".to_string()),
            AppError::MpesaApi { .. } => (StatusCode::BAD_GATEWAY, "M-Pesa error".to_string()),
            AppError::TransactionNotFound => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            AppError::PaymentRequestNotFound => (StatusCode::NOT_FOUND, "Payment request not found".to_string()),
            AppError::InvalidObjectId(_) => (StatusCode::BAD_REQUEST, "Invalid ID format".to_string()),
            AppError::Http(_) => (StatusCode::BAD_GATEWAY, "External API error".to_string()),
        };

        // Validation and config errors carry the exact offending keys so the
        // caller can tell which field or variable to fix.
        let body = match &self {
            AppError::MissingFields(missing) | AppError::MissingConfig(missing) => Json(json!({
                "success": false,
                "error": error_message,
                "message": self.to_string(),
                "missing": missing,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
            _ => Json(json!({
                "success": false,
                "error": error_message,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        };

        (status, body).into_response()
    }
}

impl From<bson::oid::Error> for AppError {
    fn from(err: bson::oid::Error) -> Self {
        AppError::InvalidObjectId(err.to_string())
    }
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn mpesa_auth(msg: impl Into<String>) -> Self {
        AppError::MpesaAuth(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
