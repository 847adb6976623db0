//! Maps a non-2xx downstream response to the unified error taxonomy
//! (spec §4.1 "Downstream error mapping").

use serde::Deserialize;

use crate::error::{ErrorCode, RuntimeError};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct Envelope {
    error: EnvelopeError,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: Option<String>,
    message: Option<String>,
}

/// Parses up to 1 MiB of `body` as `{"error":{"code":..,"message":..}}` and
/// maps `status` to the taxonomy. An unstructured body is embedded verbatim
/// into the resulting message.
pub fn map_downstream_error(status: u16, body: &[u8]) -> RuntimeError {
    let truncated = &body[..body.len().min(MAX_BODY_BYTES)];
    let parsed: Option<Envelope> = serde_json::from_slice(truncated).ok();

    let (downstream_code, downstream_message) = match &parsed {
        Some(env) => (
            env.error.code.clone(),
            env.error
                .message
                .clone()
                .unwrap_or_else(|| "downstream error".to_string()),
        ),
        None => (
            None,
            String::from_utf8_lossy(truncated).trim().to_string(),
        ),
    };

    match status {
        400 => RuntimeError::invalid_input(downstream_message),
        401 => RuntimeError::unauthorized(downstream_message),
        403 => RuntimeError::forbidden(downstream_message),
        404 => RuntimeError::not_found(downstream_message),
        409 => RuntimeError::conflict(downstream_message),
        410 => RuntimeError::gone(downstream_message),
        422 => RuntimeError::payment_failed(downstream_message),
        503 => RuntimeError::service_unavailable(downstream_message),
        500..=599 => RuntimeError {
            code: ErrorCode::Internal,
            message: format!("downstream server error ({status}): {downstream_message}"),
            fields: None,
            cause: None,
        },
        _ => RuntimeError {
            code: downstream_code
                .as_deref()
                .map(code_from_str)
                .unwrap_or(ErrorCode::Internal),
            message: downstream_message,
            fields: None,
            cause: None,
        },
    }
}

fn code_from_str(code: &str) -> ErrorCode {
    match code {
        "INVALID_INPUT" => ErrorCode::InvalidInput,
        "UNAUTHORIZED" => ErrorCode::Unauthorized,
        "FORBIDDEN" => ErrorCode::Forbidden,
        "NOT_FOUND" => ErrorCode::NotFound,
        "CONFLICT" => ErrorCode::Conflict,
        "GONE" => ErrorCode::Gone,
        "PAYMENT_FAILED" => ErrorCode::PaymentFailed,
        "RATE_LIMITED" => ErrorCode::RateLimited,
        "CIRCUIT_OPEN" => ErrorCode::CircuitOpen,
        "SERVICE_UNAVAILABLE" => ErrorCode::ServiceUnavailable,
        "VALIDATION" => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}
