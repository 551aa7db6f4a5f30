//! Core domain types shared across the dispatch pipeline.

use serde::{Deserialize, Serialize};

/// A candidate model in the fallback priority list.
///
/// The cooldown ledger is keyed by `provider:profile` so that two
/// authentication identities for the same provider cool down independently;
/// per-model stats nest under that key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    /// Provider identifier (e.g. "anthropic", "openai").
    pub provider: String,
    /// Model identifier within the provider (e.g. "gpt-5-mini").
    pub model_id: String,
    /// Authentication/usage identity. `None` means the provider's default
    /// profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

impl ModelRef {
    #[must_use]
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
            profile_id: None,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    /// Cooldown ledger key for this candidate's identity.
    #[must_use]
    pub fn ledger_key(&self) -> String {
        format!(
            "{}:{}",
            self.provider,
            self.profile_id.as_deref().unwrap_or("default")
        )
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model_id)
    }
}

/// Scopes which dispatch a chat turn belongs to. Consumed as a lookup key
/// only; never mutated by the dispatch core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRoute {
    pub agent_id: String,
    pub session_key: String,
}

impl SessionRoute {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_key: session_key.into(),
        }
    }
}

impl std::fmt::Display for SessionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent_id, self.session_key)
    }
}

/// Payload counts reported by the agent runtime at the end of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCounts {
    /// Payloads the user was meant to see.
    pub non_silent: usize,
    /// Payloads intentionally suppressed (tool-only output, directives).
    pub silent: usize,
}
