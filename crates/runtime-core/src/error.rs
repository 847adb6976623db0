//! Unified error taxonomy shared by every service built on this runtime.
//!
//! Every handler, the resilient HTTP client, and the Kafka consumer surface
//! errors through [`RuntimeError`]. The [`actix_web::error::ResponseError`]
//! impl renders the standard envelope described in the external interfaces:
//!
//! ```json
//! {"error": {"code": "NOT_FOUND", "message": "cart not found", "fields": null}}
//! ```

use std::collections::HashMap;
use std::fmt;

use actix_web::{http::StatusCode, HttpResponse};
use serde_json::json;

/// A stable machine-readable code paired with each [`RuntimeError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Gone,
    PaymentFailed,
    RateLimited,
    CircuitOpen,
    ServiceUnavailable,
    Validation,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Gone => "GONE",
            ErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Gone => StatusCode::GONE,
            ErrorCode::PaymentFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The runtime's typed error. Carries the code, a human message, an optional
/// per-field validation map, and the underlying cause for `source()` chains.
#[derive(Debug, thiserror::Error)]
pub struct RuntimeError {
    pub code: ErrorCode,
    pub message: String,
    pub fields: Option<HashMap<String, String>>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl RuntimeError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: None,
            cause: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Gone, message)
    }

    pub fn payment_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PaymentFailed, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CircuitOpen, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn validation(fields: HashMap<String, String>) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: "validation failed".to_string(),
            fields: Some(fields),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl actix_web::error::ResponseError for RuntimeError {
    fn status_code(&self) -> StatusCode {
        self.code.status()
    }

    fn error_response(&self) -> HttpResponse {
        if self.code == ErrorCode::Internal {
            tracing::error!(code = self.code.as_str(), message = %self.message, "internal error");
            return HttpResponse::build(self.code.status()).json(json!({
                "error": {
                    "code": ErrorCode::Internal.as_str(),
                    "message": "an internal error occurred",
                }
            }));
        }
        HttpResponse::build(self.code.status()).json(json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "fields": self.fields,
            }
        }))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_never_leak_message_in_response() {
        let err = RuntimeError::internal("db connection string leaked here");
        let resp = actix_web::error::ResponseError::error_response(&err);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_errors_carry_field_map() {
        let mut fields = HashMap::new();
        fields.insert("quantity".to_string(), "must be >= 1".to_string());
        let err = RuntimeError::validation(fields.clone());
        assert_eq!(err.fields, Some(fields));
        assert_eq!(err.code.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn circuit_open_and_service_unavailable_preserve_code_despite_5xx_status() {
        let err = RuntimeError::circuit_open("circuit 'cart-service' is open");
        let resp = actix_web::error::ResponseError::error_response(&err);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = RuntimeError::service_unavailable("peer unreachable");
        let resp = actix_web::error::ResponseError::error_response(&err);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn codes_map_to_documented_statuses() {
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::PaymentFailed.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ErrorCode::CircuitOpen.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
