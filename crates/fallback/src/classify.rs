//! Text-pattern classification for providers that only surface strings.
//!
//! The controller API is typed ([`crate::ModelError`]); this classifier is
//! the bridge for error messages coming out of SDKs that don't expose
//! structured failure categories.

use crate::ModelErrorKind;

/// Classify a provider error message into a [`ModelErrorKind`].
#[must_use]
pub fn classify_message(message: &str) -> ModelErrorKind {
    let msg = message.to_lowercase();

    // Rate limiting.
    if msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("rate_limit")
        || msg.contains("too many requests")
    {
        return ModelErrorKind::RateLimited;
    }

    // Auth errors.
    if msg.contains("401")
        || msg.contains("403")
        || msg.contains("unauthorized")
        || msg.contains("forbidden")
        || msg.contains("invalid api key")
        || msg.contains("invalid_api_key")
        || msg.contains("authentication")
    {
        return ModelErrorKind::Auth;
    }

    // Billing / quota exhaustion disables the key like an auth failure.
    if msg.contains("billing")
        || msg.contains("insufficient_quota")
        || msg.contains("usage limit")
        || msg.contains("quota")
    {
        return ModelErrorKind::Fatal;
    }

    // Invalid request (400-level, non-auth, non-rate-limit).
    if msg.contains("400") || msg.contains("bad request") || msg.contains("invalid_request") {
        return ModelErrorKind::InvalidRequest;
    }

    // Server errors and everything unrecognised: retryable.
    ModelErrorKind::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rate_limit() {
        assert_eq!(
            classify_message("429 Too Many Requests: rate limit exceeded"),
            ModelErrorKind::RateLimited
        );
    }

    #[test]
    fn classify_auth() {
        assert_eq!(
            classify_message("401 Unauthorized: invalid api key"),
            ModelErrorKind::Auth
        );
    }

    #[test]
    fn classify_quota_as_fatal() {
        assert_eq!(
            classify_message("insufficient_quota: billing limit reached"),
            ModelErrorKind::Fatal
        );
    }

    #[test]
    fn classify_invalid_request() {
        assert_eq!(
            classify_message("400 Bad Request: invalid JSON"),
            ModelErrorKind::InvalidRequest
        );
    }

    #[test]
    fn classify_server_error_as_transient() {
        assert_eq!(
            classify_message("502 Bad Gateway"),
            ModelErrorKind::Transient
        );
    }

    #[test]
    fn classify_unknown_as_transient() {
        assert_eq!(
            classify_message("connection reset by peer"),
            ModelErrorKind::Transient
        );
    }
}
