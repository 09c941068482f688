//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//!
//! # Error Categories
//!
//! - **Validation**: bad coordinates, inactive actor, unauthorized actor.
//!   Rejected synchronously, nothing changes.
//! - **Conflict**: trip already assigned, transition not allowed from the
//!   current state, duplicate payment. The caller may retry with fresh state.
//! - **Resource**: insufficient funds, spend limit crossed, wallet frozen.
//!   The triggering entity (e.g. a completed trip) is unaffected.
//! - **Transient**: payment-gateway failures; retried with backoff before
//!   becoming terminal.
//! - **Internal**: database errors and broken invariants; details are hidden
//!   from the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::models::trip::TripStatus;

/// Application-wide error type.
///
/// Every variant maps to a stable machine-readable error code so callers can
/// distinguish "try again" from "needs different input" from "contact
/// support".
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bearer token is missing, invalid, or revoked.
    #[error("Invalid auth token")]
    InvalidToken,

    /// Request body or parameters are invalid; the string says what.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// The acting user is not the passenger or driver of the trip.
    #[error("Not authorized for this trip")]
    NotAuthorized,

    /// Requesting passenger is not an active passenger account.
    #[error("Passenger account is not active")]
    PassengerInactive,

    /// Pickup or dropoff falls outside the configured service area.
    #[error("Location is outside the service area")]
    OutOfServiceArea,

    /// Trip does not exist.
    #[error("Trip not found")]
    TripNotFound,

    /// Requested state change is not in the transition table, or another
    /// actor won the race for it.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TripStatus, to: TripStatus },

    /// Another driver already won the assignment for this trip.
    #[error("Trip already assigned to a driver")]
    TripAlreadyAssigned,

    /// Driver is offline, busy, or not an active driver account.
    #[error("Driver is not available")]
    DriverNotAvailable,

    /// No wallet row exists for the user.
    #[error("Wallet not found")]
    WalletNotFound,

    /// Available balance cannot cover the debit.
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Debit would cross the daily or monthly spend cap.
    #[error("Spend limit exceeded")]
    LimitExceeded,

    /// Wallet is frozen; no movement allowed.
    #[error("Wallet is frozen")]
    WalletFrozen,

    /// Wallet is suspended; no movement allowed.
    #[error("Wallet is suspended")]
    WalletSuspended,

    /// Cumulative refunds would exceed the original transaction amount.
    #[error("Refund exceeds the original transaction")]
    RefundExceedsOriginal,

    /// Payment does not exist.
    #[error("Payment not found")]
    PaymentNotFound,

    /// Refunds are only valid against a completed payment.
    #[error("Payment is not refundable in its current state")]
    PaymentNotRefundable,

    /// A settlement for this trip already exists.
    #[error("Payment already exists for this trip")]
    DuplicatePayment,

    /// External payment gateway rejected or timed out; retried with backoff.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// A financial invariant did not hold. The enclosing transaction is
    /// aborted entirely; nothing is partially applied.
    #[error("Invariant violation: {0}")]
    Invariant(&'static str),
}

impl AppError {
    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "internal_error",
            AppError::InvalidToken => "invalid_token",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::NotAuthorized => "not_authorized",
            AppError::PassengerInactive => "passenger_inactive",
            AppError::OutOfServiceArea => "out_of_service_area",
            AppError::TripNotFound => "trip_not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::TripAlreadyAssigned => "trip_already_assigned",
            AppError::DriverNotAvailable => "driver_not_available",
            AppError::WalletNotFound => "wallet_not_found",
            AppError::InsufficientFunds => "insufficient_funds",
            AppError::LimitExceeded => "limit_exceeded",
            AppError::WalletFrozen => "wallet_frozen",
            AppError::WalletSuspended => "wallet_suspended",
            AppError::RefundExceedsOriginal => "refund_exceeds_original",
            AppError::PaymentNotFound => "payment_not_found",
            AppError::PaymentNotRefundable => "payment_not_refundable",
            AppError::DuplicatePayment => "duplicate_payment",
            AppError::Gateway(_) => "gateway_error",
            AppError::Invariant(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotAuthorized | AppError::PassengerInactive => StatusCode::FORBIDDEN,
            AppError::OutOfServiceArea => StatusCode::BAD_REQUEST,
            AppError::TripNotFound | AppError::WalletNotFound | AppError::PaymentNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::InvalidTransition { .. }
            | AppError::TripAlreadyAssigned
            | AppError::DriverNotAvailable
            | AppError::DuplicatePayment
            | AppError::PaymentNotRefundable => StatusCode::CONFLICT,
            AppError::InsufficientFunds
            | AppError::LimitExceeded
            | AppError::WalletFrozen
            | AppError::WalletSuspended
            | AppError::RefundExceedsOriginal => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "insufficient_funds",
///     "message": "Insufficient funds"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            // Hide internal details from the client.
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "An internal error occurred".to_string()
            }
            AppError::Invariant(what) => {
                tracing::error!(what = %what, "invariant violation");
                "An internal error occurred".to_string()
            }
            AppError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::InsufficientFunds.code(), "insufficient_funds");
        assert_eq!(
            AppError::TripAlreadyAssigned.code(),
            "trip_already_assigned"
        );
        assert_eq!(
            AppError::InvalidTransition {
                from: TripStatus::Requested,
                to: TripStatus::Completed,
            }
            .code(),
            "invalid_transition"
        );
    }

    #[test]
    fn conflict_and_resource_classes_map_to_distinct_statuses() {
        assert_eq!(AppError::TripAlreadyAssigned.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::LimitExceeded.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::NotAuthorized.status(), StatusCode::FORBIDDEN);
    }
}
