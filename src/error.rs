use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::oracle::OracleError;

/// Error taxonomy for the trading engine.
///
/// Validation and balance errors are rejected before any state change.
/// `PriceUnavailable` is transient: the trigger monitor skips the tick and
/// retries, while manual closes surface it to the caller. `Conflict` is
/// returned only after the bounded settlement retry is exhausted.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Position already closed: {0}")]
    AlreadyClosed(String),
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),
    #[error("Account bankrupt; trading locked for {days_remaining} more day(s)")]
    Bankrupt { days_remaining: i64 },
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),
    #[error("Trading entitlement missing")]
    NotEntitled,
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<OracleError> for AppError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::SymbolNotFound(symbol) => {
                AppError::NotFound(format!("Unknown symbol: {}", symbol))
            }
            other => AppError::PriceUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InsufficientBalance { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::AlreadyClosed(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::PriceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Bankrupt { .. } => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotEntitled => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_symbol_not_found_maps_to_not_found() {
        let err: AppError = OracleError::SymbolNotFound("XYZ/USDT".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_oracle_timeout_maps_to_price_unavailable() {
        let err: AppError = OracleError::Timeout.into();
        assert!(matches!(err, AppError::PriceUnavailable(_)));
    }

    #[test]
    fn test_bankrupt_message_names_remaining_days() {
        let err = AppError::Bankrupt { days_remaining: 12 };
        assert_eq!(
            err.to_string(),
            "Account bankrupt; trading locked for 12 more day(s)"
        );
    }
}
