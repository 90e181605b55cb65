//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::InvalidId;
use lending::LendingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Outcome of a lending operation.
    Lending(LendingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "validation", msg),
            ApiError::Lending(err) => {
                let status = lending_status(&err);
                if err.is_internal() {
                    tracing::error!(error = %err, "internal server error");
                }
                (status, err.reason(), err.to_string())
            }
        };

        let body = serde_json::json!({ "error": message, "reason": reason });
        (status, axum::Json(body)).into_response()
    }
}

fn lending_status(err: &LendingError) -> StatusCode {
    match err {
        LendingError::Validation(_) => StatusCode::BAD_REQUEST,
        LendingError::StudentNotFound(_)
        | LendingError::BookNotFound(_)
        | LendingError::LoanNotFound { .. } => StatusCode::NOT_FOUND,
        LendingError::IneligibleDisabled(_)
        | LendingError::UnpaidFine(_)
        | LendingError::BookUnavailable(_)
        | LendingError::AlreadyBorrowed { .. }
        | LendingError::NoActiveLoan { .. }
        | LendingError::NothingToPay(_) => StatusCode::CONFLICT,
        LendingError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        LendingError::InvalidLoanPeriod | LendingError::Timeout(_) | LendingError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<LendingError> for ApiError {
    fn from(err: LendingError) -> Self {
        ApiError::Lending(err)
    }
}

impl From<InvalidId> for ApiError {
    fn from(err: InvalidId) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
