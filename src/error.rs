//! Error types for the Uni-Relay request layer.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type covering configuration, capability, and provider
/// failures.
///
/// Only [`Unsupported`](Self::Unsupported) (and configuration errors raised at
/// construction time) ever reach a caller of
/// [`ChatAdapter::send_request`](crate::traits::ChatAdapter::send_request).
/// Everything else is absorbed by the retry engine and converted into either
/// another attempt or a fixed fallback string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    /// Invalid or missing configuration (bad alias, zero timeout, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested adapter alias or provider identifier is not known.
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// The key store has no value for the named credential.
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// The provider does not offer this operation (vision, tools, embeddings).
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The request exceeded the provider's context window.
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// The response was unusable, e.g. cut off in the middle of a reasoning block.
    #[error("Transient output defect: {0}")]
    TransientOutputDefect(String),

    /// The remote API returned HTTP 429 (too many requests).
    #[error("Rate limited")]
    RateLimited,

    /// Rate-limit backoff gave up after the given number of attempts.
    #[error("Max retries exceeded after {0} attempts")]
    MaxRetriesExceeded(u32),

    /// Opaque downstream failure (malformed or empty completion).
    #[error("Provider fault: {0}")]
    ProviderFault(String),

    /// An HTTP or transport-level error from a remote provider.
    #[error("API error: {0}")]
    ApiError(String),

    /// The remote API returned HTTP 401/403 (bad or missing credentials).
    #[error("Unauthorized")]
    Unauthorized,

    /// The attempt exceeded its configured timeout.
    #[error("Timeout")]
    Timeout,

    /// The service is currently unavailable (HTTP 5xx, circuit breaker open, etc.).
    #[error("Unavailable")]
    Unavailable,

    /// The caller's cancellation token fired.
    #[error("Cancelled")]
    Cancelled,
}

/// Fragments that providers use to report an oversized prompt. Matched
/// case-insensitively against error codes and messages.
const CONTEXT_OVERFLOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
    "context length",
    "too many tokens",
    "prompt is too long",
    "reduce the length",
    "input is too long",
];

impl RelayError {
    /// Returns `true` for transient errors that may succeed on retry:
    /// [`RateLimited`](Self::RateLimited), [`Timeout`](Self::Timeout), and
    /// [`Unavailable`](Self::Unavailable).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Unavailable)
    }

    /// Returns `true` when the error should trigger a shrink-and-retry.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Self::ContextLengthExceeded(_))
    }

    /// Returns `true` when the failure says something about the health of
    /// the backend and should count towards opening the circuit breaker.
    ///
    /// Overflows, output defects and rate limits are properties of the request
    /// or of the caller's quota, not of the service.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::ApiError(_) | Self::ProviderFault(_) | Self::Timeout | Self::Unavailable
        )
    }

    /// Returns `true` for errors that are raised to the caller instead of
    /// being converted into a fallback reply.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_) | Self::Config(_) | Self::MissingKey(_) | Self::ProviderNotFound(_)
        )
    }

    /// Build an error from free-form provider error text, recognising the
    /// various ways vendors spell "your prompt is too long".
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if mentions_context_overflow(&message) {
            Self::ContextLengthExceeded(message)
        } else {
            Self::ApiError(message)
        }
    }
}

/// Check whether `text` (an error code, message, or raw error body) names a
/// context-window overflow.
pub fn mentions_context_overflow(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    CONTEXT_OVERFLOW_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}
