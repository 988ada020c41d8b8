//! Shared utilities for HTTP transports: status mapping and transport-error
//! conversion.

use crate::error::RelayError;

/// Map a non-success HTTP status and its body to a `RelayError`.
///
/// 400 and 413 bodies are inspected for context-overflow wording, since
/// most backends report an oversized prompt as a plain bad request.
pub(crate) fn status_error(provider_name: &str, status: u16, body: &str) -> RelayError {
    match status {
        429 => RelayError::RateLimited,
        401 | 403 => RelayError::Unauthorized,
        500..=599 => RelayError::Unavailable,
        400 | 413 => RelayError::classify_message(format!(
            "{} API error ({}): {}",
            provider_name, status, body
        )),
        _ => RelayError::ApiError(format!("{} API error: {}", provider_name, status)),
    }
}

/// Returns `Ok(response)` when the status is 2xx, otherwise reads the body
/// and maps it with [`status_error`].
pub(crate) async fn check_http_status(
    provider_name: &str,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(provider_name, status.as_u16(), &body))
}

/// Convert a `reqwest` failure into the error taxonomy.
pub(crate) fn transport_error(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::Timeout
    } else {
        RelayError::ApiError(e.to_string())
    }
}
