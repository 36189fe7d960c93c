//! Service error taxonomy
//!
//! One error enum shared by the lifecycle services, the stores and the HTTP
//! surface. Variants map onto stable HTTP codes in the `IntoResponse` impl so
//! handlers can bubble errors with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("return window expired for item {item_id}: {days_since_delivery} days since delivery, window is {window_days}")]
    ReturnWindowExpired {
        item_id: String,
        days_since_delivery: i64,
        window_days: u32,
    },

    #[error("item {0} is not returnable")]
    NotReturnable(String),

    #[error("verification code expired")]
    OtpExpired,

    #[error("verification code mismatch")]
    OtpMismatch,

    #[error("version conflict updating {kind} {id}")]
    Conflict { kind: &'static str, id: String },

    #[error("payment gateway error: {0}")]
    Payment(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::ReturnWindowExpired { .. } => "RETURN_WINDOW_EXPIRED",
            Self::NotReturnable(_) => "NOT_RETURNABLE",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpMismatch => "OTP_MISMATCH",
            Self::Conflict { .. } => "VERSION_CONFLICT",
            Self::Payment(_) => "PAYMENT_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::OtpMismatch => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. }
            | Self::InvalidState(_)
            | Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::ReturnWindowExpired { .. } | Self::NotReturnable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::OtpExpired => StatusCode::GONE,
            Self::Payment(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<crate::domain::aggregates::OrderError> for ServiceError {
    fn from(e: crate::domain::aggregates::OrderError) -> Self {
        use crate::domain::aggregates::OrderError;
        match e {
            OrderError::IllegalTransition { from, to } => ServiceError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            OrderError::NotAssignable(status) => ServiceError::InvalidState(format!(
                "agent cannot be assigned while order is {}",
                status
            )),
            OrderError::NoItems | OrderError::Money(_) => ServiceError::Validation(e.to_string()),
        }
    }
}

impl From<crate::domain::aggregates::ReturnError> for ServiceError {
    fn from(e: crate::domain::aggregates::ReturnError) -> Self {
        use crate::domain::aggregates::ReturnError;
        match e {
            ReturnError::IllegalTransition { from, to } => ServiceError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            ReturnError::NotRefundable(status) => ServiceError::InvalidState(format!(
                "refunds cannot be applied while return is {}",
                status
            )),
            ReturnError::NoPickupOtp => {
                ServiceError::InvalidState("no pickup code has been issued".to_string())
            }
            ReturnError::NoItems
            | ReturnError::UnknownItem(_)
            | ReturnError::AlreadyRefunded(_)
            | ReturnError::NonPositiveRefund(_)
            | ReturnError::Money(_) => ServiceError::Validation(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            ServiceError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(ServiceError::not_found("order", "ORD-1").code(), "NOT_FOUND");
        assert_eq!(ServiceError::OtpExpired.code(), "OTP_EXPIRED");
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let resp = ServiceError::conflict("order", "ORD-1").into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
