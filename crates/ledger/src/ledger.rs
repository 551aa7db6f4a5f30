//! Ledger data model and merge-style mutation helpers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Failure stats for one model under a profile key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_ms: Option<u64>,
}

/// Ledger entry for one `provider:profile` identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_until_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, ModelStats>,
}

/// The full persisted ledger, keyed by `provider:profile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownLedger {
    #[serde(default)]
    pub entries: BTreeMap<String, ProfileEntry>,
}

impl CooldownLedger {
    /// Record a retryable failure: bump error counts and extend cooldowns
    /// at both the profile and model level. Cooldowns never move backwards
    /// across consecutive failures of one key.
    pub fn record_failure(&mut self, key: &str, model_id: &str, now_ms: u64, delay_ms: u64) {
        let entry = self.entries.entry(key.to_string()).or_default();
        let until = now_ms.saturating_add(delay_ms);

        entry.error_count = entry.error_count.saturating_add(1);
        entry.cooldown_until_ms = Some(entry.cooldown_until_ms.unwrap_or(0).max(until));

        let stats = entry.models.entry(model_id.to_string()).or_default();
        stats.error_count = stats.error_count.saturating_add(1);
        stats.cooldown_until_ms = Some(stats.cooldown_until_ms.unwrap_or(0).max(until));
    }

    /// Record a fatal/auth failure: disable the profile key until
    /// `until_ms` with a reason, on top of the regular failure bump.
    pub fn record_disabled(
        &mut self,
        key: &str,
        model_id: &str,
        now_ms: u64,
        until_ms: u64,
        reason: impl Into<String>,
    ) {
        self.record_failure(key, model_id, now_ms, 0);
        let entry = self.entries.entry(key.to_string()).or_default();
        entry.disabled_until_ms = Some(entry.disabled_until_ms.unwrap_or(0).max(until_ms));
        entry.disabled_reason = Some(reason.into());
    }

    /// Record a successful invocation: a working key is live again, so
    /// error counts, cooldowns, and the disabled state all clear.
    pub fn record_success(&mut self, key: &str, model_id: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.error_count = 0;
            entry.cooldown_until_ms = None;
            entry.disabled_until_ms = None;
            entry.disabled_reason = None;
            if let Some(stats) = entry.models.get_mut(model_id) {
                stats.error_count = 0;
                stats.cooldown_until_ms = None;
            }
        }
    }

    /// Current consecutive-failure count for a profile key.
    #[must_use]
    pub fn error_count(&self, key: &str) -> u32 {
        self.entries.get(key).map_or(0, |e| e.error_count)
    }

    /// Whether the given model under the given key may be attempted now.
    #[must_use]
    pub fn is_available(&self, key: &str, model_id: &str, now_ms: u64) -> bool {
        self.next_available_ms(key, model_id)
            .is_none_or(|at| at <= now_ms)
    }

    /// Earliest instant at which all cooldown/disabled blocks on this
    /// model clear. `None` when nothing blocks it.
    #[must_use]
    pub fn next_available_ms(&self, key: &str, model_id: &str) -> Option<u64> {
        let entry = self.entries.get(key)?;
        let model_until = entry
            .models
            .get(model_id)
            .and_then(|s| s.cooldown_until_ms);
        [entry.cooldown_until_ms, entry.disabled_until_ms, model_until]
            .into_iter()
            .flatten()
            .max()
    }

    /// Clear entries, optionally filtered to one provider. Returns the
    /// removed keys in order.
    pub fn reset(&mut self, provider: Option<&str>) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| match provider {
                Some(p) => key
                    .split_once(':')
                    .is_some_and(|(key_provider, _)| key_provider == p),
                None => true,
            })
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
