//! Cooldown ledger: persisted per-model/per-profile failure and backoff
//! bookkeeping acting as a circuit breaker across concurrent dispatches.
//!
//! Entries are keyed by `provider:profile` with per-model stats nested
//! underneath, so two authentication identities for one provider cool down
//! independently. The ledger lives in a JSON file mutated read-merge-write
//! under an advisory file lock; concurrent writers never lose each other's
//! increments.

pub mod backoff;
pub mod error;
pub mod ledger;
pub mod store;

pub use {
    backoff::BackoffPolicy,
    error::{Error, Result},
    ledger::{CooldownLedger, ModelStats, ProfileEntry},
    store::LedgerStore,
};
