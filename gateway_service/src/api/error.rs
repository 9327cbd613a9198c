use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::error::{MerchantError, PaymentError, PayoutError};

/// Error unificado del API con código estable.
///
/// El cuerpo siempre es `{"error": {"code", "message"}}`; los errores
/// internos se loguean completos pero viajan opacos al cliente.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "VALIDATION_FAILED", message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "Internal server error",
        )
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::NotFound(_) | PaymentError::ReferenceNotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            PaymentError::ValidationError(_) | PaymentError::RateUnavailable(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", err.to_string())
            }
            PaymentError::ConflictingState { .. }
            | PaymentError::InvalidTransition { .. }
            | PaymentError::AlreadyBound(_) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", err.to_string())
            }
            PaymentError::ComplianceBlocked(_) => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "COMPLIANCE_BLOCKED",
                err.to_string(),
            ),
            PaymentError::Ledger(e) => {
                tracing::error!("Ledger error surfaced at API: {}", e);
                ApiError::internal()
            }
            PaymentError::RepositoryError(e) => {
                tracing::error!("Payment repository error: {}", e);
                ApiError::internal()
            }
        }
    }
}

impl From<MerchantError> for ApiError {
    fn from(err: MerchantError) -> Self {
        match &err {
            MerchantError::UnknownApiKey => ApiError::unauthorized("Unknown API key"),
            MerchantError::Inactive(_) | MerchantError::KycNotApproved(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "VALIDATION_FAILED", err.to_string())
            }
            MerchantError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            MerchantError::RepositoryError(e) => {
                tracing::error!("Merchant repository error: {}", e);
                ApiError::internal()
            }
        }
    }
}

impl From<PayoutError> for ApiError {
    fn from(err: PayoutError) -> Self {
        match &err {
            PayoutError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            PayoutError::InvalidState(_) | PayoutError::InsufficientFunds(_) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", err.to_string())
            }
            PayoutError::SettlementError(e) | PayoutError::RepositoryError(e) => {
                tracing::error!("Payout error: {}", e);
                ApiError::internal()
            }
            PayoutError::Ledger(e) => {
                tracing::error!("Ledger error on payout: {}", e);
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}
