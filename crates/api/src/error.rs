//! API error type and taxonomy-to-HTTP mapping.
//!
//! Business conflicts (duplicate flash rent, double charge) map to 409
//! with a distinguishable error code; data-integrity failures map to
//! 404/412; transport trouble upstream maps to 502. Every response body
//! carries a structured `{ error: { code, message } }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rental_engine::EngineError;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "ORDER_NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }
}

impl From<rental_types::Error> for ApiError {
    fn from(err: rental_types::Error) -> Self {
        use rental_types::Error::*;

        let (status, code) = match &err {
            OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            DuplicateFlashRent(_) => (StatusCode::CONFLICT, "DUPLICATE_FLASH_RENT_ORDER"),
            FeeAlreadyCharged { .. } => (StatusCode::CONFLICT, "FEE_ALREADY_CHARGED"),
            InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            QuotaExhausted(_) => (StatusCode::PRECONDITION_FAILED, "QUOTA_EXHAUSTED"),
            InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            InsufficientBalance { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "INSUFFICIENT_POOL_BALANCE")
            }
            ChainRejected(_) => (StatusCode::BAD_GATEWAY, "CHAIN_REJECTED"),
            NetworkError(_) | Timeout(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            StorageError(_) | ConfigError(_) | Other(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Domain(domain) => domain.into(),
            EngineError::Chain(chain) => Self {
                status: StatusCode::BAD_GATEWAY,
                code: "UPSTREAM_ERROR",
                message: chain.to_string(),
            },
            EngineError::InvalidState(_, _) => Self {
                status: StatusCode::CONFLICT,
                code: "INVALID_STATE",
                message: err.to_string(),
            },
            EngineError::InvalidBatch(_) | EngineError::Validation(_) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "VALIDATION_ERROR",
                message: err.to_string(),
            },
            EngineError::Config(_) | EngineError::Shutdown | EngineError::Internal(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INTERNAL_ERROR",
                message: err.to_string(),
            },
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
