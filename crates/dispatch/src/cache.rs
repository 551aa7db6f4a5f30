//! Recent-send cache: suppresses duplicate outbound notices.
//!
//! An explicit component with an injected clock and explicit eviction (TTL
//! plus size-triggered sweep), owned by the dispatcher rather than living
//! as hidden module state.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use plume_common::clock::Clock;

pub struct RecentSendCache {
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    max_entries: usize,
    entries: Mutex<HashMap<String, u64>>,
}

impl RecentSendCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: u64, max_entries: usize) -> Self {
        Self {
            clock,
            ttl_ms,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `key` unless it was already sent within the TTL. Returns true
    /// when the caller should proceed with the send.
    pub fn insert_if_absent(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&at) = entries.get(key) {
            if now.saturating_sub(at) < self.ttl_ms {
                return false;
            }
        }

        if entries.len() >= self.max_entries {
            Self::sweep(&mut entries, now, self.ttl_ms, self.max_entries);
        }
        entries.insert(key.to_string(), now);
        true
    }

    /// Whether `key` was sent within the TTL.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .is_some_and(|&at| now.saturating_sub(at) < self.ttl_ms)
    }

    /// Drop expired entries; if still at capacity, drop oldest first.
    fn sweep(entries: &mut HashMap<String, u64>, now: u64, ttl_ms: u64, max_entries: usize) {
        entries.retain(|_, &mut at| now.saturating_sub(at) < ttl_ms);
        while entries.len() >= max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|&(_, &at)| at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }
}
