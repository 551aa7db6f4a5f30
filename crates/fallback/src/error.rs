use std::time::Duration;

use crate::controller::FallbackAttempt;

/// How a model failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Server error, network hiccup, or anything unclassified — retryable,
    /// advances fallback, increments cooldown.
    Transient,
    /// 429 — cooldown seeded from the provider's retry hint when present.
    RateLimited,
    /// Bad key or permissions — disables the key for a long cooldown.
    Auth,
    /// Unrecoverable provider failure — disables the key.
    Fatal,
    /// Malformed request — it will fail on every candidate, so the walk
    /// terminates immediately instead of burning cooldowns.
    InvalidRequest,
}

impl ModelErrorKind {
    /// Whether this error kind should advance to the next candidate.
    #[must_use]
    pub fn advances_fallback(self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }

    /// Whether this error kind disables the key rather than cooling it.
    #[must_use]
    pub fn disables(self) -> bool {
        matches!(self, Self::Auth | Self::Fatal)
    }
}

/// A typed failure from one model invocation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
    /// Provider-supplied retry hint (rate limits only).
    pub retry_after: Option<Duration>,
}

impl ModelError {
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ModelErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Auth,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Fatal,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::InvalidRequest,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build from a bare message string, classifying by text patterns.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: crate::classify::classify_message(&message),
            message,
            retry_after: None,
        }
    }
}

/// Terminal error: every candidate was skipped or failed.
#[derive(Debug, Clone, thiserror::Error)]
pub struct AllModelsFailed {
    /// One record per skipped or failed candidate, in walk order.
    pub attempts: Vec<FallbackAttempt>,
    /// True iff no candidate was actually invoked (all skipped).
    pub all_in_cooldown: bool,
    /// Time until the earliest cooldown among the candidates clears.
    pub retry_after_ms: Option<u64>,
}

impl std::fmt::Display for AllModelsFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.all_in_cooldown {
            write!(f, "all candidate models are cooling down")?;
            if let Some(ms) = self.retry_after_ms {
                write!(f, " (retry in {}s)", ms.div_ceil(1000))?;
            }
            return Ok(());
        }
        write!(f, "all candidate models failed")?;
        let failures: Vec<String> = self
            .attempts
            .iter()
            .filter(|a| !a.skipped)
            .map(|a| format!("{}: {}", a.model, a.error))
            .collect();
        if !failures.is_empty() {
            write!(f, ": {}", failures.join("; "))?;
        }
        Ok(())
    }
}
