//! Exponential backoff with jitter and cap for cooldown durations.
//!
//! The exact curve of the original system is not recoverable; constants are
//! documented here and overridable per controller.

use rand::Rng;

/// Cooldown growth policy. Delay for the n-th consecutive failure is
/// `min(base_ms * factor^(n-1), cap_ms)` with a uniform ±`jitter` fraction
/// applied.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
    /// Jitter fraction in `[0, 1)`; 0.1 means ±10 %.
    pub jitter: f64,
    /// Cooldown applied when a key is disabled by a fatal/auth error.
    pub disabled_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 10_000,
            factor: 2.0,
            cap_ms: 600_000,
            jitter: 0.1,
            disabled_ms: 3_600_000,
        }
    }
}

impl BackoffPolicy {
    /// Policy with no jitter, for deterministic tests.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay for the given consecutive-failure count (1-based).
    #[must_use]
    pub fn delay_ms(&self, error_count: u32) -> u64 {
        let exponent = error_count.saturating_sub(1).min(32);
        let raw = (self.base_ms as f64) * self.factor.powi(exponent as i32);
        let capped = raw.min(self.cap_ms as f64);
        if self.jitter <= 0.0 {
            return capped as u64;
        }
        let spread = capped * self.jitter;
        let delta = rand::rng().random_range(-spread..=spread);
        (capped + delta).max(0.0) as u64
    }

    /// Delay seeded from a provider-supplied retry hint: the hint can only
    /// lengthen the cooldown, never shorten it.
    #[must_use]
    pub fn delay_with_hint_ms(&self, error_count: u32, hint_ms: Option<u64>) -> u64 {
        self.delay_ms(error_count).max(hint_ms.unwrap_or(0))
    }
}
